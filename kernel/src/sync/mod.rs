// =============================================================================
// MinimalOS Core — Kernel Synchronization Primitives
// =============================================================================
//
// This module provides synchronization primitives for the kernel.
// In a kernel, we can't use std::sync (there is no std). We need our own
// primitives that work in a bare-metal, interrupt-driven environment.
//
// This is a uniprocessor kernel: the only thing a lock here protects
// against is an interrupt handler running on top of the same data a
// non-interrupt context was in the middle of mutating, which is why
// every `SpinLock::lock()` disables interrupts for its duration rather
// than actually contending with another core. One lock per structure
// (PMM bitmap, heap free list, process table, inode table, open-file
// pool) and no nesting beyond that is enough to stay correct; a future
// SMP port would need real cross-core ordering on top of this.
// =============================================================================

pub mod spinlock;
