// =============================================================================
// MinimalOS Core — Kernel Drivers
// =============================================================================
//
// Drivers that run in kernel space because the core they sit next to
// (the scheduler, the in-memory filesystem) needs them before there's
// any userspace to host a driver process: the PIC and PIT live under
// `arch`, since they're bound up with trap dispatch itself; the PS/2
// keyboard driver lives here since it's a standalone IRQ1 consumer with
// nothing else depending on it.
// =============================================================================

pub mod keyboard;
