// =============================================================================
// MinimalOS Core — Kernel Stack Arena
// =============================================================================
//
// Every kernel thread (including the idle thread and every user process,
// which always has a kernel stack for trap/syscall entry) needs a stack
// that lives in kernel space. This module hands those out.
//
// LAYOUT: a dedicated high-half virtual range (`KSTACK_ARENA_BASE`) that
// only ever grows. Each stack is preceded by one unmapped guard page, so
// a kernel thread that overflows its stack faults immediately instead of
// silently corrupting the next thread's stack.
//
//   KSTACK_ARENA_BASE
//     [ guard page, unmapped ]
//     [ stack 0: KERNEL_STACK_SIZE bytes, mapped ]
//     [ guard page, unmapped ]
//     [ stack 1: KERNEL_STACK_SIZE bytes, mapped ]
//     ...
//
// Stacks are never reused by address — the arena cursor only moves
// forward. A freed stack's physical frames go back to the PMM and its
// virtual range is unmapped, but the virtual range itself is abandoned
// (simplicity over density; the arena is 64 TiB wide, this kernel will
// never come close to exhausting it).
// =============================================================================

use crate::config::{KSTACK_ARENA_BASE, KERNEL_STACK_SIZE, PAGE_SIZE};
use crate::memory::address::VirtAddr;
use crate::memory::vmm::{self, PageTableFlags};
use crate::memory::{pmm, vma};
use crate::sync::spinlock::SpinLock;

/// Next free virtual address in the arena, including the next stack's
/// leading guard page.
static ARENA_CURSOR: SpinLock<u64> = SpinLock::new(KSTACK_ARENA_BASE);

/// A kernel stack allocated from the arena.
#[derive(Debug, Clone, Copy)]
pub struct KernelStack {
    /// Lowest mapped address (just above the guard page).
    pub base: VirtAddr,
    /// One past the highest mapped address — the initial RSP value.
    pub top: VirtAddr,
}

/// Allocates a new kernel stack of `KERNEL_STACK_SIZE` bytes, mapped into
/// the kernel's page tables (PML4 physical address `pml4_phys`).
///
/// Returns `None` if the PMM runs out of physical frames partway through;
/// any frames already mapped for this stack are left mapped (the arena
/// never reuses virtual ranges, so this only wastes physical memory in
/// an already-fatal OOM condition).
pub fn alloc(pml4_phys: crate::memory::address::PhysAddr) -> Option<KernelStack> {
    let mut cursor = ARENA_CURSOR.lock();

    // Leading guard page: reserve the range but never map it.
    let base = *cursor + PAGE_SIZE;
    let top = base + KERNEL_STACK_SIZE as u64;

    let mut va = base;
    while va < top {
        let frame = pmm::alloc_frame()?;
        // SAFETY: va is page-aligned (arena base + guard + multiples of
        // PAGE_SIZE) and frame is a freshly allocated, unmapped frame.
        unsafe {
            vmm::map_page(pml4_phys, VirtAddr::new(va), frame, PageTableFlags::KERNEL_DATA)
                .expect("kstack: virtual address already mapped");
        }
        vmm::flush(VirtAddr::new(va));
        va += PAGE_SIZE;
    }

    *cursor = top;

    Some(KernelStack {
        base: VirtAddr::new(base),
        top: VirtAddr::new(top),
    })
}

/// Frees a kernel stack's physical frames and unmaps its virtual range.
///
/// The virtual range itself is not returned to the arena (see module
/// docs) — only the frames backing it are freed.
///
/// # Safety
/// The stack must not be in use by any running or scheduled thread.
pub unsafe fn free(stack: KernelStack, pml4_phys: crate::memory::address::PhysAddr) {
    let mut va = stack.base.as_u64();
    while va < stack.top.as_u64() {
        // SAFETY: the stack was mapped by `alloc` against this same
        // `pml4_phys`; unmapping it here is the matching teardown.
        if let Ok(frame) = unsafe { vmm::unmap_page(pml4_phys, VirtAddr::new(va)) } {
            pmm::free_frame(frame);
            vmm::flush(VirtAddr::new(va));
        }
        va += PAGE_SIZE;
    }
}

/// Convenience wrapper: allocate a kernel stack mapped into the kernel's
/// own page tables, used for kernel threads and as the trap-entry stack
/// shared by every process (`mm::kernel_pml4`).
pub fn alloc_kernel() -> Option<KernelStack> {
    alloc(vma::kernel_pml4())
}
