// =============================================================================
// MinimalOS Core — 8253/8254 PIT (Programmable Interval Timer)
// =============================================================================
//
// Drives preemption: IRQ0 fires at a fixed rate, and each tick decrements
// the current thread's time slice (see `task::process::tick`). This is
// the only timer the kernel uses — no APIC timer, no HPET (out of scope).
// =============================================================================

use super::cpu::outb;
use super::pic;
use crate::config::PIT_FREQUENCY_HZ;

const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Channel 0, access mode lo/hi byte, mode 3 (square wave), binary count.
const PIT_CMD_CHANNEL0_MODE3: u8 = 0x36;

/// Base input frequency of the PIT oscillator.
const PIT_BASE_FREQUENCY: u32 = 1_193_180;

/// Programs the PIT to tick at `PIT_FREQUENCY_HZ` and unmasks IRQ0.
///
/// Per the external interface contract: command byte 0x36 to port 0x43,
/// then the 16-bit divisor programmed low byte first, then high byte, to
/// port 0x40. `divisor = PIT_BASE_FREQUENCY / frequency`.
pub fn init() {
    let divisor = PIT_BASE_FREQUENCY / PIT_FREQUENCY_HZ;
    // SAFETY: programming the PIT's own I/O ports with a valid divisor.
    unsafe {
        outb(PIT_COMMAND, PIT_CMD_CHANNEL0_MODE3);
        outb(PIT_CHANNEL0_DATA, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0_DATA, ((divisor >> 8) & 0xFF) as u8);
    }
    pic::unmask_irq(0);
}
