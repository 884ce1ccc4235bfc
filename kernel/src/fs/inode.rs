//! Single in-memory hierarchical file system.
//!
//! A flat array of inodes forms a tree via `parent`: the root lives at
//! index 0 with `parent == -1`, and every other inode names its parent
//! by index. Files carry a heap-allocated content buffer capped at
//! `config::MAX_FILE_SIZE`; directories carry none. Path resolution
//! walks the tree component-by-component and never touches the disk —
//! there is no disk.
//!
//! A second, process-wide pool of `OpenFile` records sits behind every
//! process's file descriptor table (`task::process::Pcb::fds`): a table
//! slot is just an index into this pool, so `fork` can share an
//! `OpenFile` (and its seek offset) between parent and child by bumping
//! `ref_count` instead of copying the record.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{MAX_FILES, MAX_FILE_SIZE, MAX_OPEN_FILES};
use crate::error::KError;
use crate::sync::spinlock::SpinLock;

/// Index into the flat inode array. `u32` is ample for `MAX_FILES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeIndex(pub u32);

impl InodeIndex {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// The inode array's fixed root.
pub const ROOT_INODE: InodeIndex = InodeIndex(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Dir,
}

/// `d_type` values for `getdents64`, per the external interface contract.
const DT_DIR: u8 = 4;
const DT_REG: u8 = 8;

struct Inode {
    name: String,
    /// Parent's index, or `-1` only for the root.
    parent: i32,
    kind: InodeKind,
    content: Vec<u8>,
}

/// What `stat`/`fstat` report.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u64,
    pub is_dir: bool,
    pub size: u64,
}

struct FileSystem {
    inodes: [Option<Inode>; MAX_FILES],
    live: usize,
}

impl FileSystem {
    const EMPTY: Option<Inode> = None;

    const fn new() -> Self {
        Self {
            inodes: [Self::EMPTY; MAX_FILES],
            live: 0,
        }
    }
}

static FS: SpinLock<FileSystem> = SpinLock::new(FileSystem::new());

/// Process-wide pool entry backing a file descriptor. Shared between a
/// `fork`ed parent and child: both point at the same slot and the same
/// seek offset until one of them `close`s.
pub struct OpenFile {
    pub inode: InodeIndex,
    pub offset: usize,
    pub ref_count: u32,
}

struct OpenFilePool {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl OpenFilePool {
    const EMPTY: Option<OpenFile> = None;

    const fn new() -> Self {
        Self {
            slots: [Self::EMPTY; MAX_OPEN_FILES],
        }
    }
}

static OPEN_FILES: SpinLock<OpenFilePool> = SpinLock::new(OpenFilePool::new());

/// Creates the root directory. Must run once, before any other `fs::inode`
/// call.
pub fn init() {
    let mut fs = FS.lock();
    fs.inodes[0] = Some(Inode {
        name: String::new(),
        parent: -1,
        kind: InodeKind::Dir,
        content: Vec::new(),
    });
    fs.live = 1;
    log::info!("fs: root directory ready (capacity {} inodes)", MAX_FILES);
}

/// Looks up a single path component `name` as a direct child of `parent`.
fn lookup_child(fs: &FileSystem, parent: InodeIndex, name: &str) -> Option<InodeIndex> {
    for (i, slot) in fs.inodes.iter().enumerate() {
        if let Some(inode) = slot {
            if inode.parent == parent.0 as i32 && inode.name == name {
                return Some(InodeIndex(i as u32));
            }
        }
    }
    None
}

/// Resolves `path` to an inode, absolute (leading `/`) or relative to
/// `cwd`. `.` and `..` are supported; `..` at the root is a no-op.
pub fn resolve(cwd: InodeIndex, path: &str) -> Result<InodeIndex, KError> {
    let fs = FS.lock();
    let mut current = if path.starts_with('/') { ROOT_INODE } else { cwd };

    for component in path.split('/').filter(|c| !c.is_empty()) {
        if component == "." {
            continue;
        }
        if component == ".." {
            let inode = fs.inodes[current.idx()].as_ref().ok_or(KError::NotFound)?;
            if inode.parent >= 0 {
                current = InodeIndex(inode.parent as u32);
            }
            continue;
        }
        match lookup_child(&fs, current, component) {
            Some(next) => current = next,
            None => return Err(KError::NotFound),
        }
    }

    Ok(current)
}

/// Resolves every component of `path` except the last, returning the
/// parent directory inode and the final component's name.
pub fn resolve_parent<'a>(cwd: InodeIndex, path: &'a str) -> Result<(InodeIndex, &'a str), KError> {
    let trimmed = path.trim_end_matches('/');
    let (dir, name) = match trimmed.rfind('/') {
        Some(pos) => (&trimmed[..=pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    };
    if name.is_empty() || name == "." || name == ".." {
        return Err(KError::InvalidArgument);
    }
    let parent = if dir.is_empty() { cwd } else { resolve(cwd, dir)? };
    Ok((parent, name))
}

/// Creates a new inode of `kind` named `name` under `parent`.
pub fn create(parent: InodeIndex, name: &str, kind: InodeKind) -> Result<InodeIndex, KError> {
    let mut fs = FS.lock();

    {
        let parent_inode = fs.inodes[parent.idx()].as_ref().ok_or(KError::NotFound)?;
        if parent_inode.kind != InodeKind::Dir {
            return Err(KError::NotADirectory);
        }
    }
    if lookup_child(&fs, parent, name).is_some() {
        return Err(KError::AlreadyMapped);
    }
    if fs.live >= MAX_FILES {
        return Err(KError::TooManyFiles);
    }

    let slot = fs
        .inodes
        .iter()
        .position(|s| s.is_none())
        .ok_or(KError::TooManyFiles)?;

    fs.inodes[slot] = Some(Inode {
        name: String::from(name),
        parent: parent.0 as i32,
        kind,
        content: Vec::new(),
    });
    fs.live += 1;

    Ok(InodeIndex(slot as u32))
}

/// Opens (without creating) or creates `path` (if `create_new` is set and
/// it doesn't exist yet), returning the backing inode.
pub fn open_or_create(cwd: InodeIndex, path: &str, create_new: bool) -> Result<InodeIndex, KError> {
    match resolve(cwd, path) {
        Ok(inode) => Ok(inode),
        Err(KError::NotFound) if create_new => {
            let (parent, name) = resolve_parent(cwd, path)?;
            create(parent, name, InodeKind::File)
        }
        Err(e) => Err(e),
    }
}

/// Reads up to `buf.len()` bytes starting at `offset` from a file inode.
pub fn read(inode: InodeIndex, offset: usize, buf: &mut [u8]) -> Result<usize, KError> {
    let fs = FS.lock();
    let node = fs.inodes[inode.idx()].as_ref().ok_or(KError::NotFound)?;
    if node.kind != InodeKind::File {
        return Err(KError::IsADirectory);
    }
    if offset >= node.content.len() {
        return Ok(0);
    }
    let n = core::cmp::min(buf.len(), node.content.len() - offset);
    buf[..n].copy_from_slice(&node.content[offset..offset + n]);
    Ok(n)
}

/// Writes `data` at `offset` into a file inode, growing its content
/// buffer as needed up to `MAX_FILE_SIZE`.
pub fn write(inode: InodeIndex, offset: usize, data: &[u8]) -> Result<usize, KError> {
    let mut fs = FS.lock();
    let node = fs.inodes[inode.idx()].as_mut().ok_or(KError::NotFound)?;
    if node.kind != InodeKind::File {
        return Err(KError::IsADirectory);
    }
    let end = offset.checked_add(data.len()).ok_or(KError::InvalidArgument)?;
    if end > MAX_FILE_SIZE {
        return Err(KError::FileTooLarge);
    }
    if end > node.content.len() {
        node.content.resize(end, 0);
    }
    node.content[offset..end].copy_from_slice(data);
    Ok(data.len())
}

/// Returns `{ino, is_dir, size}` for an inode.
pub fn stat(inode: InodeIndex) -> Result<Stat, KError> {
    let fs = FS.lock();
    let node = fs.inodes[inode.idx()].as_ref().ok_or(KError::NotFound)?;
    Ok(Stat {
        ino: inode.0 as u64,
        is_dir: node.kind == InodeKind::Dir,
        size: node.content.len() as u64,
    })
}

/// Reconstructs the absolute path of `inode` by walking `parent` links
/// to the root, for `getcwd`.
pub fn path_of(inode: InodeIndex) -> String {
    if inode == ROOT_INODE {
        return String::from("/");
    }

    let fs = FS.lock();
    let mut components: Vec<&str> = Vec::new();
    let mut current = inode;
    loop {
        let node = match fs.inodes[current.idx()].as_ref() {
            Some(n) => n,
            None => break,
        };
        if current == ROOT_INODE {
            break;
        }
        components.push(&node.name);
        if node.parent < 0 {
            break;
        }
        current = InodeIndex(node.parent as u32);
    }

    let mut path = String::new();
    for component in components.iter().rev() {
        path.push('/');
        path.push_str(component);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// A single `getdents64`-compatible record, little-endian and packed:
/// `u64 d_ino; s64 d_off; u16 d_reclen; u8 d_type; char d_name[]`, with
/// `d_reclen` rounded up to 8 bytes and including the terminating NUL.
fn encode_dirent(buf: &mut [u8], ino: u64, off: i64, d_type: u8, name: &str) -> Option<usize> {
    let name_len = name.len() + 1; // + NUL
    let header_len = 8 + 8 + 2 + 1;
    let reclen = (header_len + name_len + 7) & !7;
    if buf.len() < reclen {
        return None;
    }

    buf[0..8].copy_from_slice(&ino.to_le_bytes());
    buf[8..16].copy_from_slice(&off.to_le_bytes());
    buf[16..18].copy_from_slice(&(reclen as u16).to_le_bytes());
    buf[18] = d_type;
    buf[19..19 + name.len()].copy_from_slice(name.as_bytes());
    buf[19 + name.len()] = 0;
    for b in &mut buf[19 + name_len..reclen] {
        *b = 0;
    }

    Some(reclen)
}

/// Fills `buf` with as many directory-entry records as fit, starting
/// from child index `*cursor` (a scan position over the whole inode
/// array, not a child count — so it tolerates concurrent creation).
/// Advances `*cursor` past every record emitted, so the next call
/// resumes where this one left off, per the external interface
/// contract's `getdents64` boundary behaviour.
pub fn getdents64(dir: InodeIndex, cursor: &mut usize, buf: &mut [u8]) -> Result<usize, KError> {
    let fs = FS.lock();
    {
        let node = fs.inodes[dir.idx()].as_ref().ok_or(KError::NotFound)?;
        if node.kind != InodeKind::Dir {
            return Err(KError::NotADirectory);
        }
    }

    let mut written = 0usize;
    let mut i = *cursor;
    while i < MAX_FILES {
        if let Some(child) = fs.inodes[i].as_ref() {
            if child.parent == dir.0 as i32 {
                let d_type = if child.kind == InodeKind::Dir { DT_DIR } else { DT_REG };
                match encode_dirent(&mut buf[written..], i as u64, (i + 1) as i64, d_type, &child.name) {
                    Some(n) => {
                        written += n;
                        i += 1;
                    }
                    None => break, // buffer full; resume here next call
                }
                continue;
            }
        }
        i += 1;
    }
    *cursor = i;

    Ok(written)
}

// ── Process-wide open-file pool ─────────────────────────────────────

/// Allocates a fresh pool slot for a freshly opened `inode`, offset 0,
/// `ref_count = 1`.
pub fn pool_alloc(inode: InodeIndex) -> Result<usize, KError> {
    let mut pool = OPEN_FILES.lock();
    let slot = pool
        .slots
        .iter()
        .position(|s| s.is_none())
        .ok_or(KError::TooManyOpenFiles)?;
    pool.slots[slot] = Some(OpenFile {
        inode,
        offset: 0,
        ref_count: 1,
    });
    Ok(slot)
}

/// Bumps a pool slot's `ref_count`, used when `fork` duplicates an FD
/// table entry into the child instead of opening a fresh file.
pub fn pool_share(slot: usize) {
    let mut pool = OPEN_FILES.lock();
    if let Some(entry) = pool.slots[slot].as_mut() {
        entry.ref_count += 1;
    }
}

/// Drops one reference to a pool slot, freeing it once `ref_count`
/// reaches zero.
pub fn pool_close(slot: usize) {
    let mut pool = OPEN_FILES.lock();
    let free = if let Some(entry) = pool.slots[slot].as_mut() {
        entry.ref_count -= 1;
        entry.ref_count == 0
    } else {
        false
    };
    if free {
        pool.slots[slot] = None;
    }
}

/// Runs `f` with shared access to a pool slot's `(inode, offset)`.
pub fn pool_inode_offset(slot: usize) -> Option<(InodeIndex, usize)> {
    OPEN_FILES.lock().slots[slot].as_ref().map(|e| (e.inode, e.offset))
}

/// Advances a pool slot's seek offset by `delta` bytes (used after a
/// successful read/write).
pub fn pool_advance(slot: usize, delta: usize) {
    if let Some(entry) = OPEN_FILES.lock().slots[slot].as_mut() {
        entry.offset += delta;
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn encodes_dirent_with_8_byte_alignment() {
        let mut buf = [0u8; 64];
        let n = encode_dirent(&mut buf, 7, 8, DT_REG, "abc").unwrap();
        assert_eq!(n % 8, 0);
        assert_eq!(&buf[0..8], &7u64.to_le_bytes());
        assert_eq!(&buf[19..22], b"abc");
        assert_eq!(buf[22], 0);
    }

    #[test]
    fn dirent_too_small_returns_none() {
        let mut buf = [0u8; 4];
        assert!(encode_dirent(&mut buf, 0, 0, DT_REG, "x").is_none());
    }

    #[test]
    fn resolve_parent_splits_path_into_dir_and_name() {
        let cwd = InodeIndex(0);
        let (parent, name) = resolve_parent(cwd, "foo.txt").unwrap();
        assert_eq!(parent.0, cwd.0);
        assert_eq!(name, "foo.txt");
    }

    #[test]
    fn resolve_parent_rejects_dot_and_dotdot_as_final_component() {
        let cwd = InodeIndex(0);
        assert_eq!(resolve_parent(cwd, ".").unwrap_err(), KError::InvalidArgument);
        assert_eq!(resolve_parent(cwd, "a/..").unwrap_err(), KError::InvalidArgument);
    }

    #[test]
    fn resolve_walks_absolute_relative_dot_and_dotdot_paths() {
        init();
        let home = create(ROOT_INODE, "home", InodeKind::Dir).unwrap();
        let file = create(home, "note.txt", InodeKind::File).unwrap();

        assert_eq!(resolve(ROOT_INODE, "/home/note.txt").unwrap().0, file.0);
        assert_eq!(resolve(home, "note.txt").unwrap().0, file.0);
        assert_eq!(resolve(home, "./note.txt").unwrap().0, file.0);
        assert_eq!(resolve(file, "..").unwrap().0, home.0);
        assert_eq!(resolve(home, "..").unwrap().0, ROOT_INODE.0);
        assert_eq!(resolve(ROOT_INODE, "/nope").unwrap_err(), KError::NotFound);
    }
}
