// =============================================================================
// MinimalOS Core — Kernel Configuration Constants
// =============================================================================
//
// A single place for the magic numbers the rest of the kernel used to
// scatter as module-local consts. Anything that shows up in the external
// interface contract (virtual address layout, PIT frequency, time slice)
// lives here so the end-to-end boot/scheduling behaviour can be checked
// against one set of numbers.
// =============================================================================

/// Bytes per physical/virtual page. The only page size this kernel uses;
/// huge pages are never created, only tolerated when walking existing
/// mappings.
pub const PAGE_SIZE: u64 = 4096;

// ---------------------------------------------------------------------------
// Virtual address layout (fixed, per the external interface contract).
// ---------------------------------------------------------------------------

/// Base of the kernel image, as linked (`build/linker.ld`).
pub const KERNEL_VMA_BASE: u64 = 0xFFFF_FFFF_8000_0000;

/// Base of the dedicated high-half range for kernel stacks.
pub const KSTACK_ARENA_BASE: u64 = 0xFFFF_B000_0000_0000;

/// Base of the dedicated high-half range reserved for MMIO mappings.
pub const MMIO_ARENA_BASE: u64 = 0xFFFF_A000_0000_0000;

/// Base of the kernel heap's virtual range.
pub const HEAP_BASE: u64 = 0xFFFF_9000_0000_0000;

/// Base of the HHDM (Higher-Half Direct Map) window. The actual offset is
/// read from the boot protocol at runtime; this is only the expected/
/// documented value used for sanity checks and tests.
pub const HHDM_BASE_HINT: u64 = 0xFFFF_8000_0000_0000;

/// Top of the fixed user-stack mapping for every user process.
pub const USER_STACK_TOP: u64 = 0x8000_0000;

/// Size of the fixed user-stack mapping.
pub const USER_STACK_SIZE: u64 = 16 * 1024;

/// Initial program break for every user process's heap (`sys_brk`). Well
/// clear of any realistic ELF load address and far below the user stack.
pub const USER_HEAP_BASE: u64 = 0x1000_0000;

// ---------------------------------------------------------------------------
// Kernel heap.
// ---------------------------------------------------------------------------

/// Frames mapped into the heap on first use, before any `expand`.
pub const INITIAL_HEAP_PAGES: usize = 64; // 256 KiB

/// Frames mapped by one `expand()` call when the free list can't satisfy
/// a request.
pub const HEAP_EXPAND_PAGES: usize = 64; // 256 KiB

/// Below this leftover size, a split block is handed out whole instead of
/// being split (the remainder would be too small to ever satisfy another
/// allocation plus header).
pub const HEAP_MIN_SPLIT: usize = 32;

// ---------------------------------------------------------------------------
// Kernel stacks.
// ---------------------------------------------------------------------------

/// Size of a kernel stack, guard page excluded.
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

// ---------------------------------------------------------------------------
// Scheduling.
// ---------------------------------------------------------------------------

/// Default time slice assigned to a thread promoted to RUNNING, in PIT
/// ticks.
pub const TIME_SLICE_DEFAULT: u32 = 10;

/// PIT tick rate. At 20 Hz with the default time slice above, a thread
/// runs for 0.5s before being preempted.
pub const PIT_FREQUENCY_HZ: u32 = 20;

// ---------------------------------------------------------------------------
// Filesystem.
// ---------------------------------------------------------------------------

/// Maximum number of inodes live at once (files + directories, including
/// the root).
pub const MAX_FILES: usize = 256;

/// Maximum content size of a single regular file.
pub const MAX_FILE_SIZE: usize = 4096;

/// Size of the process-wide pool of open-file records.
pub const MAX_OPEN_FILES: usize = 256;

/// Per-process file descriptor table size. FDs 0/1/2 are reserved for
/// stdin/stdout/stderr (routed to the console/keyboard, not the FS); real
/// files are assigned starting at FD 3.
pub const MAX_FDS_PER_PROCESS: usize = 32;

/// First FD number handed out by `open`.
pub const FIRST_FILE_FD: usize = 3;
