// =============================================================================
// MinimalOS Core — Trap, IRQ, and Syscall Entry
// =============================================================================
//
// Every vector — CPU exception, PIC IRQ, or `int 0x80` syscall — lands in
// one of the 256 tiny stubs in `stubs`, which normalizes the stack and
// falls through to `handlers::isr_handler`. This module owns the shared
// trap-frame layout the stubs produce and the IDT that points to them.
// =============================================================================

pub mod handlers;
pub mod idt;
pub mod stubs;
pub mod syscall;

pub use idt::init as init_idt;

/// IDT vector CPU exceptions occupy. Vectors at or above this are IRQs or
/// the syscall gate, never architectural faults.
pub const FIRST_NON_EXCEPTION_VECTOR: u8 = 32;

/// The `int 0x80` syscall gate vector, per the external interface contract.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Register and stack state captured by `stubs::common_trap_entry` for
/// every trap, IRQ, or syscall.
///
/// Field order matches the exact byte layout the stub leaves on the
/// stack: `push r15 .. push rax` leaves `rax` at the lowest address (the
/// pointer `isr_handler` receives), so the fields below read low-to-high
/// address, not push order. The four fields after `r15` are pushed by
/// the per-vector stub itself (`vector`, `error_code`) or by the CPU
/// before the stub ever runs (`rip` through `ss`).
///
/// `#[repr(C)]` with no padding between `u64` fields reproduces this
/// layout exactly; there is no `packed` needed since every field is
/// naturally 8-byte aligned.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    /// IDT vector number, pushed by the per-vector stub.
    pub vector: u64,
    /// Hardware error code, or a synthetic `0` on vectors that don't
    /// carry one (see `stubs::HAS_ERROR_CODE`).
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    /// In long mode the CPU pushes `SS:RSP` on every interrupt, not only
    /// on a ring-3→ring-0 transition, so this is always valid.
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Whether this trap was taken while running in ring 3 (user mode).
    #[inline]
    pub fn from_user_mode(&self) -> bool {
        self.cs & 0x3 == 3
    }
}

/// Triggers a breakpoint exception, for exercising the trap path.
#[inline]
pub fn trigger_breakpoint() {
    unsafe {
        core::arch::asm!("int3");
    }
}
