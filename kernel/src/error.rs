//! The crate-wide error type.
//!
//! `#![no_std]` with no `alloc::string::String`-backed error messages:
//! every variant is a plain tag, and formatting happens once at the
//! syscall boundary (or in a log line) via `Display`. There's no
//! `std::error::Error` impl — nothing in this kernel composes errors
//! through that trait, and pulling in `core::error::Error` for a single
//! top-level enum would just be ceremony.

use core::fmt;

/// Everything that can go wrong inside the kernel, from physical memory
/// exhaustion to a bad path string from userspace.
///
/// `#[non_exhaustive]` because new syscalls and subsystems add new
/// failure modes over time, and callers outside this crate (there are
/// none yet, but the type is public) shouldn't be able to exhaustively
/// match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum KError {
    /// The physical or kernel-heap allocator has no memory left.
    OutOfMemory,
    /// A user-supplied pointer is unmapped, misaligned, or out of range.
    BadAddress,
    /// A mapping already exists where a new one was about to be created.
    AlreadyMapped,
    /// A path, inode, file descriptor, or process id doesn't exist.
    NotFound,
    /// A path component expected to be a directory isn't one.
    NotADirectory,
    /// An operation that requires a regular file was given a directory.
    IsADirectory,
    /// A syscall argument is malformed (bad flags, negative length, ...).
    InvalidArgument,
    /// A process has hit `MAX_FDS_PER_PROCESS`.
    TooManyOpenFiles,
    /// The filesystem has hit `MAX_FILES` live inodes.
    TooManyFiles,
    /// A write would grow a file past `MAX_FILE_SIZE`.
    FileTooLarge,
}

impl fmt::Display for KError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KError::OutOfMemory => "out of memory",
            KError::BadAddress => "bad address",
            KError::AlreadyMapped => "already mapped",
            KError::NotFound => "not found",
            KError::NotADirectory => "not a directory",
            KError::IsADirectory => "is a directory",
            KError::InvalidArgument => "invalid argument",
            KError::TooManyOpenFiles => "too many open files",
            KError::TooManyFiles => "too many files",
            KError::FileTooLarge => "file too large",
        };
        f.write_str(msg)
    }
}

/// POSIX-flavoured negative `errno` returned to userspace on syscall
/// failure. The kernel doesn't track a fine-grained errno table — every
/// failure is reported as `-1`, with the real reason going to the log
/// (see `traps::syscall::dispatch`).
pub const SYSCALL_ERROR: i64 = -1;
