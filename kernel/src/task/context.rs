// =============================================================================
// MinimalOS Core — Cooperative Context Switch
// =============================================================================
//
// `switch_to` is the only place the kernel actually changes which thread
// is executing. It saves the six callee-saved registers SysV requires a
// callee to preserve, plus the return address `call` already pushed, on
// the outgoing thread's kernel stack, stashes the resulting RSP, loads
// the incoming thread's RSP, and restores the same six registers before
// `ret`— which, since the incoming stack's "return address" slot holds
// whatever RIP that thread should resume at, lands execution there.
//
// A thread that has never run yet has no real saved registers, so its
// initial stack is hand-built to look like `switch_to` already ran once:
// `bootstrap::kernel_thread` / `bootstrap::user_entry` / `bootstrap::fork_child`
// each construct one of these fake frames, smuggling the real startup
// arguments through the RBX save slot and a couple of words placed right
// after the return address, in the spot a callee would expect its first
// stack argument if it had one.
// =============================================================================

use core::arch::naked_asm;
use core::mem::size_of;

use crate::task::process;
use crate::task::usermode;
use crate::traps::TrapFrame;

/// Callee-saved register snapshot. Field order matches the exact stack
/// layout `switch_to` produces: `push`es happen top-to-bottom in this
/// list, so the last field pushed (`rbp`) sits at the highest address
/// and `r15` at the lowest — i.e. `rip`, the return address `call`
/// leaves behind, sits one word above `rbp`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
#[allow(dead_code)]
pub struct Context {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub rip: u64,
}

/// Saves the six callee-saved registers and switches stacks.
///
/// # Safety
/// `prev_rsp` must be a valid location to store the outgoing stack
/// pointer; `next_rsp` must point at a stack built either by a prior
/// `switch_to` call (this same function) or by one of the `bootstrap`
/// constructors below.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to(prev_rsp: *mut u64, next_rsp: u64) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Generic first-run trampoline: every freshly bootstrapped thread's
/// `Context::rip` points here. Pops the two bootstrap arguments left
/// just above the return address into the first two SysV argument
/// registers, then tail-jumps to whatever real entry point `rbx` holds.
#[unsafe(naked)]
unsafe extern "C" fn bootstrap_trampoline() {
    naked_asm!("pop rdi", "pop rsi", "jmp rbx",);
}

/// Fork's first-run trampoline: the child's kernel stack has a full
/// `TrapFrame` sitting right where this runs, not the two-argument
/// bootstrap layout `bootstrap_trampoline` expects. Replays exactly the
/// register-restore half of `traps::stubs::common_trap_entry` so the
/// child resumes in user mode at the exact instruction fork returned 0
/// from.
#[unsafe(naked)]
unsafe extern "C" fn fork_ret_trampoline() {
    naked_asm!(
        "pop rax",
        "pop rbx",
        "pop rcx",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rbp",
        "pop r8",
        "pop r9",
        "pop r10",
        "pop r11",
        "pop r12",
        "pop r13",
        "pop r14",
        "pop r15",
        "add rsp, 16",
        "iretq",
    );
}

/// Bytes needed at the top of a fresh kernel stack for each kind of
/// first run, so callers can size their allocation/placement logic.
pub const BOOTSTRAP_FRAME_SIZE: usize = size_of::<BootstrapFrame>();

#[repr(C)]
struct BootstrapFrame {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    rip: u64,
    arg0: u64,
    arg1: u64,
}

/// Writes a `BootstrapFrame` just below `stack_top` and returns the RSP
/// `switch_to` should be handed to resume there for the first time.
///
/// # Safety
/// `[stack_top - size_of::<BootstrapFrame>(), stack_top)` must be
/// mapped, writable, and not otherwise in use.
unsafe fn write_bootstrap(stack_top: u64, target: extern "C" fn(u64, u64) -> !, arg0: u64, arg1: u64) -> u64 {
    let frame_addr = stack_top - size_of::<BootstrapFrame>() as u64;
    let frame = frame_addr as *mut BootstrapFrame;
    unsafe {
        (*frame).r15 = 0;
        (*frame).r14 = 0;
        (*frame).r13 = 0;
        (*frame).r12 = 0;
        (*frame).rbx = target as u64;
        (*frame).rbp = 0;
        (*frame).rip = bootstrap_trampoline as u64;
        (*frame).arg0 = arg0;
        (*frame).arg1 = arg1;
    }
    frame_addr
}

/// Target for a freshly spawned kernel thread's `BootstrapFrame`: calls
/// the thread body, then exits with code 0 if it ever returns.
extern "C" fn kernel_thread_trampoline(entry: u64, arg: u64) -> ! {
    let entry: extern "C" fn(u64) = unsafe { core::mem::transmute(entry) };
    entry(arg);
    process::exit_current(0);
}

/// Builds the initial stack for a kernel thread whose body is `entry`,
/// called with `arg`. Returns the RSP to hand `switch_to`.
///
/// # Safety
/// See `write_bootstrap`.
pub unsafe fn kernel_thread(stack_top: u64, entry: extern "C" fn(u64), arg: u64) -> u64 {
    unsafe { write_bootstrap(stack_top, kernel_thread_trampoline, entry as u64, arg) }
}

/// Target for a freshly loaded user process's `BootstrapFrame`: builds
/// the ring-3 `iretq` frame and jumps in. Never returns.
extern "C" fn user_entry_trampoline(entry: u64, user_rsp: u64) -> ! {
    let (user_cs, user_ss) = crate::arch::idt::user_selectors();
    let frame = usermode::IretqFrame::new(entry, user_cs, user_ss, user_rsp);
    unsafe { usermode::jump_to_ring3(&frame) }
}

/// Builds the initial stack for a brand-new user process: its very
/// first run enters ring 3 at `entry` with `user_rsp` as its stack.
///
/// # Safety
/// See `write_bootstrap`.
pub unsafe fn user_entry(stack_top: u64, entry: u64, user_rsp: u64) -> u64 {
    unsafe { write_bootstrap(stack_top, user_entry_trampoline, entry, user_rsp) }
}

/// Builds the initial stack for a forked child: `frame` (already
/// adjusted so `rax == 0`) is copied just below `stack_top`, and the
/// six callee-saved slots plus `rip = fork_ret_trampoline` are placed
/// below that, so the child's first "switch in" replays the parent's
/// `iretq` back to user mode.
///
/// # Safety
/// `[stack_top - size_of::<TrapFrame>() - 48, stack_top)` must be
/// mapped and writable.
pub unsafe fn fork_child(stack_top: u64, frame: &TrapFrame) -> u64 {
    let frame_addr = stack_top - size_of::<TrapFrame>() as u64;
    unsafe {
        core::ptr::write(frame_addr as *mut TrapFrame, *frame);
    }

    // Six callee-saved slots (all zero; never real register state) plus
    // rip, placed directly below the copied trap frame.
    let regs_addr = frame_addr - 7 * 8;
    let regs = regs_addr as *mut u64;
    unsafe {
        for i in 0..6 {
            regs.add(i).write(0);
        }
        regs.add(6).write(fork_ret_trampoline as u64);
    }
    regs_addr
}
