//! `int 0x80` syscall dispatch.
//!
//! Argument registers follow the classic System-V `int 0x80` convention
//! (distinct from the `syscall`/`sysret` MSR-based ABI, which this kernel
//! doesn't use): RAX holds the syscall number, RDI/RSI/RDX/R10/R8 hold up
//! to five arguments, and the return value goes back in RAX. Every
//! failure is reported as `config::SYSCALL_ERROR` (`-1`) with the real
//! reason logged — userspace never sees a fine-grained errno.

use alloc::string::String;
use alloc::vec;

use crate::error::{KError, SYSCALL_ERROR};
use crate::fs::inode::{self, InodeKind};
use crate::task::{input, process};
use crate::traps::TrapFrame;

const SYS_READ: u64 = 0;
const SYS_WRITE: u64 = 1;
const SYS_OPEN: u64 = 2;
const SYS_CLOSE: u64 = 3;
const SYS_STAT: u64 = 4;
const SYS_FSTAT: u64 = 5;
const SYS_LSEEK: u64 = 8;
const SYS_MMAP: u64 = 9;
const SYS_MUNMAP: u64 = 11;
const SYS_BRK: u64 = 12;
const SYS_YIELD: u64 = 24;
const SYS_NANOSLEEP: u64 = 35;
const SYS_GETPID: u64 = 39;
const SYS_FORK: u64 = 57;
const SYS_EXECVE: u64 = 59;
const SYS_EXIT: u64 = 60;
const SYS_WAIT4: u64 = 61;
const SYS_GETCWD: u64 = 79;
const SYS_CHDIR: u64 = 80;
const SYS_MKDIR: u64 = 83;
const SYS_GETTIMEOFDAY: u64 = 96;
const SYS_GETPPID: u64 = 110;
const SYS_GETDENTS64: u64 = 217;

const O_CREAT: u64 = 64;

/// Stdin/stdout/stderr never touch the filesystem.
const FD_STDIN: usize = 0;
const FD_STDOUT: usize = 1;
const FD_STDERR: usize = 2;

/// Reads a NUL-terminated path string out of user memory at `ptr`,
/// capped at `max_len` bytes of defensive slack — there is no mechanism
/// here to validate the pointer against the process's VMAs beyond not
/// running off a page that happens to be unmapped, which would simply
/// fault (a page fault from inside a syscall handler is, per the
/// external interface contract, always fatal, same as anywhere else).
unsafe fn read_user_cstr(ptr: u64, max_len: usize) -> String {
    let mut bytes = vec::Vec::with_capacity(32);
    let base = ptr as *const u8;
    for i in 0..max_len {
        // SAFETY: caller supplies a pointer from a syscall argument; an
        // invalid one faults, which the trap handler treats as fatal.
        let byte = unsafe { *base.add(i) };
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

unsafe fn user_slice<'a>(ptr: u64, len: usize) -> &'a [u8] {
    // SAFETY: same caveat as read_user_cstr.
    unsafe { core::slice::from_raw_parts(ptr as *const u8, len) }
}

unsafe fn user_slice_mut<'a>(ptr: u64, len: usize) -> &'a mut [u8] {
    // SAFETY: same caveat as read_user_cstr.
    unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) }
}

fn err_to_errno(e: KError) -> i64 {
    log::warn!("syscall: failed: {}", e);
    SYSCALL_ERROR
}

/// Dispatches the syscall captured in `frame`, writing its result back
/// into `frame.rax`.
///
/// # Safety
/// `frame` must point at a valid `TrapFrame` produced by the syscall
/// vector's stub.
pub unsafe fn dispatch(frame: *mut TrapFrame) {
    // SAFETY: caller's contract.
    let f = unsafe { &mut *frame };
    let number = f.rax;
    let a0 = f.rdi;
    let a1 = f.rsi;
    let a2 = f.rdx;
    let _a3 = f.r10;
    let _a4 = f.r8;

    let result: i64 = match number {
        SYS_READ => sys_read(a0 as usize, a1, a2 as usize),
        SYS_WRITE => sys_write(a0 as usize, a1, a2 as usize),
        SYS_OPEN => sys_open(a0, a1),
        SYS_CLOSE => sys_close(a0 as usize),
        SYS_STAT => sys_stat(a0, a1),
        SYS_FSTAT => sys_fstat(a0 as usize, a1),
        SYS_LSEEK => {
            log::debug!("syscall: lseek stub");
            -1
        }
        SYS_MMAP => {
            log::debug!("syscall: mmap stub");
            0
        }
        SYS_MUNMAP => {
            log::debug!("syscall: munmap stub");
            0
        }
        SYS_BRK => process::sys_brk(a0) as i64,
        SYS_YIELD => {
            process::yield_now();
            0
        }
        SYS_NANOSLEEP => {
            log::debug!("syscall: nanosleep stub");
            0
        }
        SYS_GETPID => process::current_pid().0 as i64,
        SYS_FORK => sys_fork(f),
        SYS_EXECVE => sys_execve(a0, f),
        SYS_EXIT => process::exit_current(a0 as i32),
        SYS_WAIT4 => {
            log::debug!("syscall: wait4 stub");
            -1
        }
        SYS_GETCWD => sys_getcwd(a0, a1 as usize),
        SYS_CHDIR => sys_chdir(a0),
        SYS_MKDIR => sys_mkdir(a0),
        SYS_GETTIMEOFDAY => {
            log::debug!("syscall: gettimeofday stub");
            0
        }
        SYS_GETPPID => process::current_parent().map(|p| p.0 as i64).unwrap_or(0),
        SYS_GETDENTS64 => sys_getdents64(a0 as usize, a1, a2 as usize),
        other => {
            log::warn!("syscall: unknown syscall {}", other);
            -1
        }
    };

    f.rax = result as u64;
}

fn sys_read(fd: usize, buf_ptr: u64, len: usize) -> i64 {
    if len == 0 {
        return 0;
    }
    if fd == FD_STDIN {
        if !input::has_input() {
            return 0;
        }
        let ch = input::pop_char();
        // SAFETY: buf_ptr/len come straight from the syscall args.
        let buf = unsafe { user_slice_mut(buf_ptr, len) };
        buf[0] = ch;
        return 1;
    }
    if fd == FD_STDOUT || fd == FD_STDERR {
        return 0;
    }

    let (inode, offset) = match process::fd_lookup(fd) {
        Some(v) => v,
        None => return err_to_errno(KError::NotFound),
    };
    // SAFETY: buf_ptr/len come straight from the syscall args.
    let buf = unsafe { user_slice_mut(buf_ptr, len) };
    match inode::read(inode, offset, buf) {
        Ok(n) => {
            process::fd_advance(fd, n);
            n as i64
        }
        Err(e) => err_to_errno(e),
    }
}

fn sys_write(fd: usize, buf_ptr: u64, len: usize) -> i64 {
    if len == 0 {
        return 0;
    }
    // SAFETY: buf_ptr/len come straight from the syscall args.
    let buf = unsafe { user_slice(buf_ptr, len) };

    if fd == FD_STDOUT || fd == FD_STDERR {
        for &b in buf {
            crate::kprint!("{}", b as char);
        }
        return len as i64;
    }
    if fd == FD_STDIN {
        return err_to_errno(KError::InvalidArgument);
    }

    let (inode, offset) = match process::fd_lookup(fd) {
        Some(v) => v,
        None => return err_to_errno(KError::NotFound),
    };
    match inode::write(inode, offset, buf) {
        Ok(n) => {
            process::fd_advance(fd, n);
            n as i64
        }
        Err(e) => err_to_errno(e),
    }
}

fn sys_open(path_ptr: u64, flags: u64) -> i64 {
    // SAFETY: path_ptr comes straight from the syscall args.
    let path = unsafe { read_user_cstr(path_ptr, 256) };
    let cwd = process::current_cwd();
    let create_new = flags & O_CREAT != 0;

    match inode::open_or_create(cwd, &path, create_new) {
        Ok(inode) => match process::fd_open(inode) {
            Ok(fd) => fd as i64,
            Err(e) => err_to_errno(e),
        },
        Err(e) => err_to_errno(e),
    }
}

fn sys_close(fd: usize) -> i64 {
    if fd == FD_STDIN || fd == FD_STDOUT || fd == FD_STDERR {
        return 0;
    }
    match process::fd_close(fd) {
        Ok(()) => 0,
        Err(e) => err_to_errno(e),
    }
}

/// Fills `{ino, mode, size}` for `inode` at `out_ptr`, matching the
/// layout user code inspects (only these three fields are defined).
#[repr(C)]
struct StatBuf {
    ino: u64,
    mode: u32,
    size: u64,
}

fn write_stat(out_ptr: u64, stat: inode::Stat) -> i64 {
    let mode: u32 = if stat.is_dir { 0o040000 } else { 0o100000 };
    let buf = StatBuf {
        ino: stat.ino,
        mode,
        size: stat.size,
    };
    // SAFETY: out_ptr comes straight from the syscall args and is
    // expected to point at room for a StatBuf.
    unsafe {
        core::ptr::write(out_ptr as *mut StatBuf, buf);
    }
    0
}

fn sys_stat(path_ptr: u64, out_ptr: u64) -> i64 {
    // SAFETY: path_ptr comes straight from the syscall args.
    let path = unsafe { read_user_cstr(path_ptr, 256) };
    let cwd = process::current_cwd();
    match inode::resolve(cwd, &path) {
        Ok(inode) => match inode::stat(inode) {
            Ok(stat) => write_stat(out_ptr, stat),
            Err(e) => err_to_errno(e),
        },
        Err(e) => err_to_errno(e),
    }
}

fn sys_fstat(fd: usize, out_ptr: u64) -> i64 {
    let (inode, _) = match process::fd_lookup(fd) {
        Some(v) => v,
        None => return err_to_errno(KError::NotFound),
    };
    match inode::stat(inode) {
        Ok(stat) => write_stat(out_ptr, stat),
        Err(e) => err_to_errno(e),
    }
}

fn sys_fork(frame: &TrapFrame) -> i64 {
    match process::fork(frame) {
        Ok(pid) => pid.0 as i64,
        Err(e) => err_to_errno(e),
    }
}

fn sys_execve(path_ptr: u64, frame: &mut TrapFrame) -> i64 {
    // SAFETY: path_ptr comes straight from the syscall args.
    let path = unsafe { read_user_cstr(path_ptr, 256) };
    let cwd = process::current_cwd();
    let inode = match inode::resolve(cwd, &path) {
        Ok(inode) => inode,
        Err(e) => return err_to_errno(e),
    };
    let stat = match inode::stat(inode) {
        Ok(s) => s,
        Err(e) => return err_to_errno(e),
    };
    let mut buf = vec::Vec::with_capacity(stat.size as usize);
    buf.resize(stat.size as usize, 0);
    if let Err(e) = inode::read(inode, 0, &mut buf).map(|_| ()) {
        return err_to_errno(e);
    }

    match process::execve(&buf) {
        Ok(()) => {
            // execve rewrote the process's own trap frame in place; copy
            // it over this syscall's frame so the upcoming iretq resumes
            // at the new entry point instead of after this `int 0x80`.
            // SAFETY: current_trap_frame_mut points at this same
            // process's (just-updated) trap frame.
            unsafe {
                *frame = *process::current_trap_frame_mut();
            }
            frame.rax
        }
        Err(e) => err_to_errno(e),
    }
}

fn sys_getcwd(buf_ptr: u64, len: usize) -> i64 {
    let cwd = process::current_cwd();
    let path = inode::path_of(cwd);
    let bytes = path.as_bytes();
    if bytes.len() + 1 > len {
        return err_to_errno(KError::InvalidArgument);
    }
    // SAFETY: buf_ptr/len come straight from the syscall args.
    let buf = unsafe { user_slice_mut(buf_ptr, len) };
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    bytes.len() as i64
}

fn sys_chdir(path_ptr: u64) -> i64 {
    // SAFETY: path_ptr comes straight from the syscall args.
    let path = unsafe { read_user_cstr(path_ptr, 256) };
    let cwd = process::current_cwd();
    match inode::resolve(cwd, &path) {
        Ok(target) => match inode::stat(target) {
            Ok(stat) if stat.is_dir => {
                process::set_current_cwd(target);
                0
            }
            Ok(_) => err_to_errno(KError::NotADirectory),
            Err(e) => err_to_errno(e),
        },
        Err(e) => err_to_errno(e),
    }
}

fn sys_mkdir(path_ptr: u64) -> i64 {
    // SAFETY: path_ptr comes straight from the syscall args.
    let path = unsafe { read_user_cstr(path_ptr, 256) };
    let cwd = process::current_cwd();
    let (parent, name) = match inode::resolve_parent(cwd, &path) {
        Ok(v) => v,
        Err(e) => return err_to_errno(e),
    };
    match inode::create(parent, name, InodeKind::Dir) {
        Ok(_) => 0,
        Err(e) => err_to_errno(e),
    }
}

fn sys_getdents64(fd: usize, buf_ptr: u64, len: usize) -> i64 {
    let (dir_inode, offset) = match process::fd_lookup(fd) {
        Some(v) => v,
        None => return err_to_errno(KError::NotFound),
    };
    let mut cursor = offset;
    // SAFETY: buf_ptr/len come straight from the syscall args.
    let buf = unsafe { user_slice_mut(buf_ptr, len) };
    match inode::getdents64(dir_inode, &mut cursor, buf) {
        Ok(written) => {
            process::fd_advance_to(fd, cursor);
            written as i64
        }
        Err(e) => err_to_errno(e),
    }
}
