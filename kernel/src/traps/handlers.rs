//! The single dispatch point every trap, IRQ, and syscall funnels through.

use crate::arch::{cpu, pic};
use crate::drivers::keyboard;
use crate::task::process;

use super::{syscall, TrapFrame, SYSCALL_VECTOR};

/// Vector 14, page fault — the only exception whose banner needs more
/// than the trap frame itself (the faulting address lives in CR2, not
/// in any register the stub saves).
const PAGE_FAULT_VECTOR: u8 = 14;

/// IRQ0 (PIT) lands here after remap.
const IRQ_TIMER_VECTOR: u8 = pic::PIC1_OFFSET;
/// IRQ1 (PS/2 keyboard) lands here after remap.
const IRQ_KEYBOARD_VECTOR: u8 = pic::PIC1_OFFSET + 1;

const EXCEPTION_NAMES: [&str; 32] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point exception",
    "alignment check",
    "machine check",
    "SIMD floating-point exception",
    "virtualization exception",
    "control protection exception",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "hypervisor injection exception",
    "VMM communication exception",
    "security exception",
    "reserved",
];

/// Called by `stubs::common_trap_entry` for every vector. `frame` points
/// at the trap frame living on the interrupted stack.
///
/// # Safety
/// Must only be reached from `common_trap_entry`; `frame` must point at
/// a fully-populated `TrapFrame`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn isr_handler(frame: *mut TrapFrame) {
    let vector = unsafe { (*frame).vector } as u8;

    if vector == SYSCALL_VECTOR {
        unsafe { syscall::dispatch(frame) };
        return;
    }

    if (32..=47).contains(&vector) {
        pic::send_eoi(vector);
        match vector {
            v if v == IRQ_TIMER_VECTOR => process::tick(),
            v if v == IRQ_KEYBOARD_VECTOR => keyboard::handle_irq(),
            _ => {}
        }
        return;
    }

    // Unhandled vector below 32: an architectural exception with no
    // recovery path (no demand paging, no signal delivery to userspace).
    let frame = unsafe { &*frame };
    let name = EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("unknown exception");
    log::error!(
        "unhandled exception: {} (vector {}, error code {:#x}) at rip={:#018x} cs={:#06x} from {}",
        name,
        vector,
        frame.error_code,
        frame.rip,
        frame.cs,
        if frame.from_user_mode() { "user" } else { "kernel" },
    );
    if vector == PAGE_FAULT_VECTOR {
        // No demand paging: every page fault is fatal, so CR2 is only
        // ever read here, right before the halt below.
        log::error!("  faulting address (cr2) = {:#018x}", cpu::read_cr2());
    }
    loop {
        unsafe { core::arch::asm!("cli; hlt") };
    }
}
