// =============================================================================
// MinimalOS Core — Memory Subsystem
// =============================================================================
//
// The memory subsystem manages all physical and virtual memory in the kernel.
// It's organized into layers:
//
//   address.rs  — PhysAddr/VirtAddr newtypes (type safety for addresses)
//   pmm.rs      — Physical Memory Manager (bitmap allocator for frames)
//   vmm.rs      — page table operations (map/unmap/translate, 4-level walk)
//   heap.rs     — kernel heap allocator (Box, Vec, etc.), grows on demand
//   kstack.rs   — guarded kernel-stack arena
//   vma.rs      — per-process address spaces (`mm`) and virtual memory areas
//
// This module only exposes what's needed. Internal details stay private.
// =============================================================================

pub mod address;
pub mod heap;
pub mod kstack;
pub mod pmm;
pub mod vma;
pub mod vmm;
