// =============================================================================
// MinimalOS Core — Kernel Entry Point
// =============================================================================
//
// `_start` runs boot in strict dependency order: each subsystem below
// assumes every one before it is already initialized. Reordering these
// calls is not safe — e.g. `vma::init_kernel_address_space` allocates a
// PML4 from the PMM, so the PMM must exist first; `heap::init` maps into
// the kernel's own page tables, so the kernel address space must be
// live before it runs.
// =============================================================================

#![no_std]
#![no_main]

extern crate alloc;

mod arch;
mod config;
mod drivers;
mod error;
mod fs;
mod memory;
mod sync;
mod task;
mod traps;
mod util;

use arch::cpu;
use memory::address::VirtAddr;
use memory::kstack::KernelStack;

/// Kernel log verbosity. Raised to `Trace` by hand when chasing a boot bug;
/// there is no runtime knob for this — no disk to read a config file from.
const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Info;

#[unsafe(no_mangle)]
unsafe extern "C" fn _start() -> ! {
    // Phase 0: get output working before anything else, so every later
    // failure has somewhere to report to.
    arch::serial::SERIAL.lock().init();
    util::logger::init(LOG_LEVEL);

    kprintln!();
    kprintln!("==========================================================");
    kprintln!("  MinimalOS Core");
    kprintln!("==========================================================");

    assert!(
        arch::boot::base_revision_supported(),
        "boot: Limine base revision not supported"
    );

    // Phase 1: physical and virtual memory.
    let hhdm_offset = arch::boot::get_hhdm_offset();
    // SAFETY: called once, before any PhysAddr::to_virt() use.
    unsafe { memory::address::init_hhdm(hhdm_offset) };

    let memory_map = arch::boot::get_memory_map();
    memory::pmm::init(memory_map);
    let stats = memory::pmm::stats();
    log::info!(
        "pmm: {} / {} frames free",
        stats.free_frames,
        stats.total_frames
    );

    let (kernel_phys_base, kernel_virt_base) = arch::boot::get_kernel_address();
    memory::vma::init_kernel_address_space(memory_map, kernel_phys_base, kernel_virt_base);
    log::info!("vma: kernel address space live");

    memory::heap::init();

    // Phase 2: traps. `read_rsp` captures the stack we're already
    // running on so the TSS has a valid RSP0 before the first ring
    // 3 → ring 0 transition, which predates any scheduler-managed stack.
    traps::init_idt(cpu::read_rsp());
    log::info!("traps: GDT/TSS/IDT loaded");

    arch::pic::remap_and_mask_all();
    arch::pit::init();
    arch::pic::unmask_irq(1); // PS/2 keyboard
    log::info!("traps: PIC remapped, PIT at {} Hz", config::PIT_FREQUENCY_HZ);

    // Phase 3: filesystem.
    fs::inode::init();

    // Phase 4: scheduler. The thread executing this function becomes
    // PID 0 ("idle") — it never runs user code again once a real
    // process is ready, it's just what's left when the ready queue
    // empties.
    let boot_stack = KernelStack {
        base: VirtAddr::new(0),
        top: VirtAddr::new(cpu::read_rsp()),
    };
    task::process::init_idle(boot_stack);

    // Phase 5: PID 1. The bootloader's module is the only way this
    // kernel obtains a user program — there is no disk or network
    // driver to load one from instead.
    match arch::boot::get_first_module() {
        Some(elf_bytes) => match task::process::spawn_user_process("init", elf_bytes, None) {
            Ok(pid) => log::info!("boot: pid 1 ({:?}) launched from boot module", pid),
            Err(e) => log::error!("boot: failed to launch boot module: {:?}", e),
        },
        None => log::warn!("boot: no boot module supplied, idling with no user process"),
    }

    sync::spinlock::enable_interrupts();

    loop {
        cpu::halt();
    }
}
