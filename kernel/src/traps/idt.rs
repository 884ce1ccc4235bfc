//! IDT, GDT, and TSS bring-up.
//!
//! All 256 vectors are pointed at the matching entry in
//! `stubs::STUB_TABLE` — there is no per-exception handler function
//! registered individually; `handlers::isr_handler` does the dispatch
//! once execution reaches Rust. Exceptions that need a guaranteed-good
//! stack (double fault) get an IST index; everything else runs on
//! whatever stack was active when the vector fired.

use spin::Once;

use crate::arch::gdt::{Gdt, Selectors};
use crate::arch::idt::{EntryOptions, GateType, Idt, PrivilegeLevel};
use crate::arch::tss::Tss;

use super::stubs::STUB_TABLE;
use super::SYSCALL_VECTOR;

/// IDT vector of the double fault exception.
const DOUBLE_FAULT_VECTOR: u8 = 8;

/// IST index wired to the dedicated double-fault stack (`Tss::init`).
const DOUBLE_FAULT_IST_INDEX: u8 = 1;

static TSS: Once<Tss> = Once::new();
static GDT: Once<Gdt> = Once::new();
static IDT: Once<Idt> = Once::new();
static SELECTORS: Once<Selectors> = Once::new();

/// Brings up the TSS, GDT, and IDT and loads all three.
///
/// `boot_rsp0` seeds the TSS's RSP0 field (used on every ring 3 → ring 0
/// transition) before the scheduler exists to keep it updated on context
/// switches; once the first process runs, `task::process::schedule`
/// keeps it current via `Tss::set_rsp0`.
pub fn init(boot_rsp0: u64) {
    let tss = TSS.call_once(|| {
        let mut tss = Tss::new();
        tss.init(boot_rsp0);
        tss
    });

    let (gdt, selectors) = Gdt::new(tss);
    let gdt = GDT.call_once(|| gdt);
    let selectors = SELECTORS.call_once(|| selectors);

    // SAFETY: gdt and selectors are 'static (stored in a Once) and
    // selectors was built from this exact gdt.
    unsafe {
        gdt.load(selectors);
    }

    let mut idt = Idt::new();
    let plain = EntryOptions::new()
        .set_present(true)
        .set_gate_type(GateType::Interrupt);
    let double_fault = plain.set_stack_index(DOUBLE_FAULT_IST_INDEX);
    // Ring 3 reaches this gate directly via `int 0x80`; DPL 3 is what
    // lets that `int` instruction through without a GPF (the CPU checks
    // CPL <= DPL for software interrupts).
    let syscall_gate = plain.set_privilege_level(PrivilegeLevel::Ring3);

    for (vector, &stub) in STUB_TABLE.iter().enumerate() {
        let options = if vector as u8 == DOUBLE_FAULT_VECTOR {
            double_fault
        } else if vector as u8 == SYSCALL_VECTOR {
            syscall_gate
        } else {
            plain
        };
        idt.set_handler(vector as u8, stub as usize, selectors.kernel_code, options);
    }

    let idt = IDT.call_once(|| idt);
    idt.load();

    log::info!(
        "idt: loaded (cs={:#06x}, ds={:#06x}, tss={:#06x})",
        selectors.kernel_code,
        selectors.kernel_data,
        selectors.tss
    );
}

/// Updates the TSS's RSP0 field, pointing ring 3 → ring 0 transitions at
/// `new_process`'s kernel stack. Called by the scheduler on every switch.
///
/// # Safety
/// Must only be called after `init` has run.
pub unsafe fn set_kernel_stack(rsp0: u64) {
    let tss = TSS.get().expect("idt: set_kernel_stack before init") as *const Tss as *mut Tss;
    unsafe {
        Tss::set_rsp0(tss, rsp0);
    }
}

/// Selector for the kernel code segment, for building an `iretq` frame
/// back into ring 0 (used by trap handlers that don't go through
/// `task::usermode`).
pub fn kernel_code_selector() -> u16 {
    SELECTORS.get().expect("idt: kernel_code_selector before init").kernel_code
}

/// Selectors for entering ring 3, used by `task::usermode` when first
/// jumping into a freshly loaded user process.
pub fn user_selectors() -> (u16, u16) {
    let selectors = SELECTORS.get().expect("idt: user_selectors before init");
    (selectors.user_code, selectors.user_data)
}
