// =============================================================================
// MinimalOS Core — PS/2 Keyboard Driver (IRQ1)
// =============================================================================
//
// Translates scancode set 1 make-codes from the PS/2 controller's output
// port into ASCII and feeds them to `task::input`'s ring buffer, which
// `sys_read(STDIN)` drains. Break codes (bit 7 set) and non-printable
// scancodes (function keys, arrows, modifiers with no ASCII meaning) are
// dropped; shift state is tracked so letters and the punctuation row
// produce the shifted character while either shift key is held.
// =============================================================================

use crate::arch::cpu::inb;
use crate::task::input;
use core::sync::atomic::{AtomicBool, Ordering};

const DATA_PORT: u16 = 0x60;

const LEFT_SHIFT_MAKE: u8 = 0x2A;
const RIGHT_SHIFT_MAKE: u8 = 0x36;
const LEFT_SHIFT_BREAK: u8 = LEFT_SHIFT_MAKE | 0x80;
const RIGHT_SHIFT_BREAK: u8 = RIGHT_SHIFT_MAKE | 0x80;

static SHIFT_HELD: AtomicBool = AtomicBool::new(false);

/// Scancode set 1, make codes 0x02..0x39, unshifted.
const UNSHIFTED: [u8; 0x3A] = [
    0, 0x1b, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ',
];

/// Same layout, shifted.
const SHIFTED: [u8; 0x3A] = [
    0, 0x1b, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ',
];

/// Called from `traps::handlers::isr_handler` on every IRQ1. Reads
/// exactly one scancode byte from the controller's data port — the PIC
/// has already been sent EOI by the caller.
pub fn handle_irq() {
    // SAFETY: reading the PS/2 controller's output buffer, the standard
    // response to an IRQ1 firing.
    let scancode = unsafe { inb(DATA_PORT) };

    match scancode {
        LEFT_SHIFT_MAKE | RIGHT_SHIFT_MAKE => {
            SHIFT_HELD.store(true, Ordering::Relaxed);
            return;
        }
        LEFT_SHIFT_BREAK | RIGHT_SHIFT_BREAK => {
            SHIFT_HELD.store(false, Ordering::Relaxed);
            return;
        }
        _ => {}
    }

    // Break code (key release): nothing else in this driver cares.
    if scancode & 0x80 != 0 {
        return;
    }

    let table = if SHIFT_HELD.load(Ordering::Relaxed) {
        &SHIFTED
    } else {
        &UNSHIFTED
    };

    if let Some(&ascii) = table.get(scancode as usize) {
        if ascii != 0 {
            input::push_char(ascii as char);
        }
    }
}
