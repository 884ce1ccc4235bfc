//! Minimal ELF64 parser for loading user-mode executables.
//!
//! Supports loading statically-linked ELF64 executables with PT_LOAD segments.
//! Only the subset needed to load flat user binaries is implemented.

/// ELF magic number: 0x7f 'E' 'L' 'F'.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 64-bit.
const ELFCLASS64: u8 = 2;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF type: executable.
const ET_EXEC: u16 = 2;

/// ELF machine: x86-64.
const EM_X86_64: u16 = 62;

/// Program header type: loadable segment.
const PT_LOAD: u32 = 1;

/// Program header flags.
pub const PF_X: u32 = 1; // Execute
pub const PF_W: u32 = 2; // Write
const _PF_R: u32 = 4; // Read

/// ELF64 file header (first 64 bytes).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF64 program header (56 bytes).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Information extracted from a validated ELF64 executable.
pub struct ElfInfo<'a> {
    /// Raw ELF data.
    pub data: &'a [u8],
    /// Entry point virtual address.
    pub entry: u64,
    /// Program headers.
    pub phdrs: &'a [Elf64Phdr],
}

/// Errors that can occur during ELF parsing.
#[derive(Debug)]
pub enum ElfError {
    TooSmall,
    BadMagic,
    Not64Bit,
    NotLittleEndian,
    NotExecutable,
    NotX86_64,
    BadPhdr,
    /// A `PT_LOAD` segment's `[p_offset, p_offset + p_filesz)` range is
    /// out of bounds for the file (or overflows computing it) — a
    /// crafted header, not a legitimately truncated build artifact.
    SegmentOutOfBounds,
}

/// Parse and validate an ELF64 executable from a byte slice.
pub fn parse(data: &[u8]) -> Result<ElfInfo<'_>, ElfError> {
    if data.len() < core::mem::size_of::<Elf64Header>() {
        return Err(ElfError::TooSmall);
    }

    // SAFETY: we checked size; the struct is packed so alignment is 1.
    let hdr = unsafe { &*(data.as_ptr() as *const Elf64Header) };

    if hdr.e_ident[0..4] != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }
    if hdr.e_ident[4] != ELFCLASS64 {
        return Err(ElfError::Not64Bit);
    }
    if hdr.e_ident[5] != ELFDATA2LSB {
        return Err(ElfError::NotLittleEndian);
    }
    if hdr.e_type != ET_EXEC {
        return Err(ElfError::NotExecutable);
    }
    if hdr.e_machine != EM_X86_64 {
        return Err(ElfError::NotX86_64);
    }

    let phoff = hdr.e_phoff as usize;
    let phnum = hdr.e_phnum as usize;
    let phentsize = hdr.e_phentsize as usize;

    if phentsize != core::mem::size_of::<Elf64Phdr>() {
        return Err(ElfError::BadPhdr);
    }

    // `phoff`/`phnum` come straight off an attacker-reachable header (any
    // process can `execve` a crafted file); plain `+`/`*` on them could
    // wrap in a release build and slip an out-of-bounds `phoff` past the
    // `phdrs_end > data.len()` guard, turning the `add` below into
    // out-of-bounds pointer arithmetic. Reject on overflow instead.
    let phdrs_len = phnum.checked_mul(phentsize).ok_or(ElfError::BadPhdr)?;
    let phdrs_end = phoff.checked_add(phdrs_len).ok_or(ElfError::BadPhdr)?;
    if phdrs_end > data.len() {
        return Err(ElfError::BadPhdr);
    }

    // SAFETY: bounds checked, packed struct, alignment 1.
    let phdrs = unsafe {
        core::slice::from_raw_parts(
            data.as_ptr().add(phoff) as *const Elf64Phdr,
            phnum,
        )
    };

    for phdr in phdrs {
        if !phdr.is_load() {
            continue;
        }
        // Same attacker-reachable-overflow concern as phoff/phnum above:
        // a segment's on-disk range must fit in the file before any
        // caller is allowed to slice `data` with it.
        let seg_end = phdr
            .p_offset
            .checked_add(phdr.p_filesz)
            .ok_or(ElfError::SegmentOutOfBounds)?;
        if seg_end > data.len() as u64 {
            return Err(ElfError::SegmentOutOfBounds);
        }
    }

    Ok(ElfInfo {
        data,
        entry: hdr.e_entry,
        phdrs,
    })
}

/// Convert ELF segment flags to page flags for the load-time mapping:
/// every `PT_LOAD` segment is writable while its bytes are being copied
/// in, regardless of `PF_W` (`task::process::load_elf` revokes write
/// access afterwards for segments that didn't ask for it).
///
/// Returns `(user_rw, executable)`.
pub fn segment_flags(p_flags: u32) -> (bool, bool) {
    let executable = (p_flags & PF_X) != 0;
    (true, executable)
}

impl Elf64Phdr {
    /// Returns true if this is a PT_LOAD segment.
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    /// Builds a minimal, otherwise-valid 64-byte ELF64 header with no
    /// program headers (`e_phnum = 0`).
    fn valid_header() -> [u8; 64] {
        let mut buf = [0u8; 64];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        buf[24..32].copy_from_slice(&0x40_0000u64.to_le_bytes()); // e_entry
        buf[54..56].copy_from_slice(&(core::mem::size_of::<Elf64Phdr>() as u16).to_le_bytes());
        buf
    }

    #[test]
    fn parses_a_valid_header_with_no_segments() {
        let buf = valid_header();
        let info = parse(&buf).expect("valid header should parse");
        assert_eq!(info.entry, 0x40_0000);
        assert!(info.phdrs.is_empty());
    }

    #[test]
    fn rejects_truncated_input() {
        let buf = [0u8; 32];
        assert!(matches!(parse(&buf), Err(ElfError::TooSmall)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = valid_header();
        buf[0] = 0x00;
        assert!(matches!(parse(&buf), Err(ElfError::BadMagic)));
    }

    #[test]
    fn rejects_32_bit_class() {
        let mut buf = valid_header();
        buf[4] = 1; // ELFCLASS32
        assert!(matches!(parse(&buf), Err(ElfError::Not64Bit)));
    }

    #[test]
    fn rejects_big_endian() {
        let mut buf = valid_header();
        buf[5] = 2; // ELFDATA2MSB
        assert!(matches!(parse(&buf), Err(ElfError::NotLittleEndian)));
    }

    #[test]
    fn rejects_non_executable_type() {
        let mut buf = valid_header();
        buf[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        assert!(matches!(parse(&buf), Err(ElfError::NotExecutable)));
    }

    #[test]
    fn rejects_wrong_machine() {
        let mut buf = valid_header();
        buf[18..20].copy_from_slice(&3u16.to_le_bytes()); // EM_386
        assert!(matches!(parse(&buf), Err(ElfError::NotX86_64)));
    }

    #[test]
    fn rejects_program_headers_past_end_of_file() {
        let mut buf = valid_header();
        buf[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        buf[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum = 1, no room
        assert!(matches!(parse(&buf), Err(ElfError::BadPhdr)));
    }

    #[test]
    fn rejects_phdr_count_that_overflows_phdrs_end() {
        let mut buf = valid_header();
        buf[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        buf[56..58].copy_from_slice(&u16::MAX.to_le_bytes()); // e_phnum, huge
        assert!(matches!(parse(&buf), Err(ElfError::BadPhdr)));
    }

    /// A one-segment ELF64 image, with `p_offset`/`p_filesz` set by the
    /// caller so the PT_LOAD bounds check can be exercised directly.
    fn header_with_one_load_segment(p_offset: u64, p_filesz: u64) -> [u8; 120] {
        let mut buf = [0u8; 120];
        buf[0..64].copy_from_slice(&valid_header());
        buf[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        buf[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum
        buf[64..68].copy_from_slice(&PT_LOAD.to_le_bytes()); // p_type
        buf[72..80].copy_from_slice(&p_offset.to_le_bytes());
        buf[96..104].copy_from_slice(&p_filesz.to_le_bytes());
        buf[104..112].copy_from_slice(&p_filesz.to_le_bytes()); // p_memsz
        buf
    }

    #[test]
    fn rejects_load_segment_whose_file_range_runs_past_end_of_file() {
        let buf = header_with_one_load_segment(64, 1000);
        assert!(matches!(parse(&buf), Err(ElfError::SegmentOutOfBounds)));
    }

    #[test]
    fn rejects_load_segment_whose_offset_plus_filesz_overflows() {
        let buf = header_with_one_load_segment(u64::MAX - 4, 16);
        assert!(matches!(parse(&buf), Err(ElfError::SegmentOutOfBounds)));
    }

    #[test]
    fn accepts_load_segment_fully_inside_the_file() {
        let buf = header_with_one_load_segment(64, 56);
        let info = parse(&buf).expect("in-bounds segment should parse");
        assert_eq!(info.phdrs.len(), 1);
    }

    #[test]
    fn segment_flags_grants_exec_only_for_pf_x() {
        assert_eq!(segment_flags(PF_W), (true, false));
        assert_eq!(segment_flags(PF_X), (true, true));
        assert_eq!(segment_flags(PF_W | PF_X), (true, true));
    }
}
