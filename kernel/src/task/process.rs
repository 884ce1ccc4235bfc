// =============================================================================
// MinimalOS Core — Process Control Blocks and the Scheduler
// =============================================================================
//
// Every thread of execution, kernel or user, is a `Pcb` sitting in the
// global process table. The scheduler is deliberately simple: a single
// FIFO ready queue and preemptive round robin, driven by the PIT tick in
// `tick()`. There is no priority, no multicore load balancing — one CPU,
// one ready queue.
//
// PID 0 is reserved for the idle thread, created by `init_idle` before
// interrupts are ever enabled and never placed on the ready queue: it
// only runs when nothing else is runnable.
// =============================================================================

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::config::{TIME_SLICE_DEFAULT, USER_HEAP_BASE, USER_STACK_SIZE, USER_STACK_TOP};
use crate::error::KError;
use crate::fs::elf;
use crate::fs::inode::{self, InodeIndex, ROOT_INODE};
use crate::memory::address::VirtAddr;
use crate::memory::kstack::{self, KernelStack};
use crate::memory::vma::{Mm, VmaFlags};
use crate::sync::spinlock::SpinLock;
use crate::task::context;
use crate::traps::TrapFrame;

/// Process id. Newtype so a raw integer never gets passed where a pid is
/// expected (or vice versa).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u64);

pub const IDLE_PID: Pid = Pid(0);

/// Where a process currently stands with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    /// Exited; its exit code is readable until the PCB is reaped. This
    /// kernel never reaps — `wait4` is a stub — so a zombie simply stays
    /// out of the ready queue forever.
    Zombie,
}

/// A single process's file descriptor table. Slots 0/1/2 are implicit
/// (stdin/stdout/stderr route straight to the console/keyboard and never
/// occupy an open-file pool slot); real files start at
/// `config::FIRST_FILE_FD`.
struct FdTable {
    /// `fds[i]` is the open-file pool slot backing descriptor `i`, or
    /// `None` if the descriptor is unused.
    fds: Vec<Option<usize>>,
}

impl FdTable {
    fn new() -> Self {
        Self {
            fds: alloc::vec![None; crate::config::MAX_FDS_PER_PROCESS],
        }
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        (crate::config::FIRST_FILE_FD..self.fds.len()).find(|&i| self.fds[i].is_none())
    }
}

/// The process control block.
pub struct Pcb {
    pub pid: Pid,
    pub name: String,
    pub parent: Option<Pid>,

    /// Saved kernel stack pointer while not running; meaningless while
    /// `state == Running` (the live RSP lives in the CPU register then).
    rsp: u64,
    kstack: KernelStack,

    /// `None` for the idle thread and any kernel thread — they run
    /// entirely in kernel space and share the kernel's own page tables.
    pub mm: Option<Mm>,

    /// The trap frame a running user process will resume into on its
    /// next ring 3 entry. Copied wholesale by `fork`; rewritten wholesale
    /// by `execve`. Unused by kernel threads.
    pub trap_frame: TrapFrame,

    pub state: ProcessState,
    /// Remaining PIT ticks before this thread is forced to yield.
    pub time_slice: u32,
    pub total_runtime: u64,
    pub exit_code: i32,

    pub cwd_inode: InodeIndex,
    fd_table: FdTable,

    /// Current program break (`sys_brk`). Only meaningful for user
    /// processes; kernel threads never call `brk`.
    brk: u64,
    /// Page-aligned high-water mark of what's actually mapped for the
    /// heap so far; always `>= brk` rounded up to a page. Tracked
    /// separately from `brk` so repeated small `brk` growths within an
    /// already-mapped page don't re-map it.
    brk_mapped: u64,
}

impl Pcb {
    fn blank(pid: Pid, name: &str, kstack: KernelStack) -> Self {
        Self {
            pid,
            name: name.to_string(),
            parent: None,
            rsp: 0,
            kstack,
            mm: None,
            trap_frame: zeroed_trap_frame(),
            state: ProcessState::Ready,
            time_slice: TIME_SLICE_DEFAULT,
            total_runtime: 0,
            exit_code: 0,
            cwd_inode: ROOT_INODE,
            fd_table: FdTable::new(),
            brk: USER_HEAP_BASE,
            brk_mapped: USER_HEAP_BASE,
        }
    }

    /// The kernel CR3 to install while this thread runs: its own `Mm` if
    /// it's a user process, otherwise the kernel's address space.
    fn pml4_phys(&self) -> crate::memory::address::PhysAddr {
        match &self.mm {
            Some(mm) => mm.pml4_phys,
            None => crate::memory::vma::kernel_pml4(),
        }
    }

    fn fd_table_slots(&self) -> &[Option<usize>] {
        &self.fd_table.fds
    }
}

fn zeroed_trap_frame() -> TrapFrame {
    // SAFETY: TrapFrame is a repr(C) struct of plain u64 fields; the
    // all-zero bit pattern is a valid (if meaningless) value, overwritten
    // before any user process's trap_frame is ever read and unused by
    // kernel threads entirely.
    unsafe { core::mem::zeroed() }
}

struct Scheduler {
    /// Every PCB that has ever existed, indexed by pid. `None` once a
    /// process is fully torn down (this kernel never reuses pids, so in
    /// practice every populated slot stays populated).
    table: Vec<Option<Pcb>>,
    ready: VecDeque<Pid>,
    current: Pid,
    next_pid: u64,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            table: Vec::new(),
            ready: VecDeque::new(),
            current: IDLE_PID,
            next_pid: 0,
        }
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    fn get(&self, pid: Pid) -> &Pcb {
        self.table[pid.0 as usize].as_ref().expect("process: pid not in table")
    }

    fn get_mut(&mut self, pid: Pid) -> &mut Pcb {
        self.table[pid.0 as usize].as_mut().expect("process: pid not in table")
    }

    fn insert(&mut self, pcb: Pcb) -> Pid {
        let pid = pcb.pid;
        let idx = pid.0 as usize;
        if idx >= self.table.len() {
            self.table.resize_with(idx + 1, || None);
        }
        self.table[idx] = Some(pcb);
        pid
    }
}

static SCHEDULER: SpinLock<Scheduler> = SpinLock::new(Scheduler::new());

/// Installs the currently running bootstrap thread as PID 0, "idle". Must
/// be called exactly once, before interrupts are enabled, from the stack
/// the kernel booted on — `idle` never runs any code of its own, it is
/// simply what's left executing when the ready queue empties out.
pub fn init_idle(boot_stack: KernelStack) {
    let mut sched = SCHEDULER.lock();
    let mut pcb = Pcb::blank(IDLE_PID, "idle", boot_stack);
    pcb.state = ProcessState::Running;
    let pid = sched.insert(pcb);
    sched.current = pid;
    log::info!("process: idle thread ready (pid {})", pid.0);
}

/// Returns the currently running process's pid.
pub fn current_pid() -> Pid {
    SCHEDULER.lock().current
}

/// Returns the currently running process's parent pid, if any.
pub fn current_parent() -> Option<Pid> {
    let sched = SCHEDULER.lock();
    sched.get(sched.current).parent
}

/// Spawns a new kernel thread running `entry(arg)`, ready to run as soon
/// as the scheduler gets to it.
pub fn spawn_kernel_thread(name: &str, entry: extern "C" fn(u64), arg: u64) -> Result<Pid, KError> {
    let kstack = kstack::alloc_kernel().ok_or(KError::OutOfMemory)?;
    let mut sched = SCHEDULER.lock();
    let pid = sched.alloc_pid();
    let mut pcb = Pcb::blank(pid, name, kstack);
    // SAFETY: kstack.top is freshly mapped and otherwise unused.
    pcb.rsp = unsafe { context::kernel_thread(kstack.top.as_u64(), entry, arg) };
    sched.insert(pcb);
    sched.ready.push_back(pid);
    log::info!("process: spawned kernel thread {:?} (pid {})", name, pid.0);
    Ok(pid)
}

/// Derives the `VmaFlags` a `PT_LOAD` segment should be mapped with while
/// its bytes are being copied in. See `load_elf` for where write access
/// gets revoked afterwards for segments that didn't ask for it.
fn segment_load_flags(phdr_flags: u32) -> VmaFlags {
    let (_, executable) = elf::segment_flags(phdr_flags);
    let mut flags = VmaFlags::READ | VmaFlags::WRITE;
    if executable {
        flags |= VmaFlags::EXEC;
    }
    flags
}

/// Loads every `PT_LOAD` segment of `info` into `mm`, zero-filling the
/// gap between `p_filesz` and `p_memsz` (BSS). Segments without `PF_W`
/// have their write permission revoked once the copy is done — the
/// mapping is temporarily writable during loading regardless of the
/// segment's own flags, since the loader has to write the bytes in
/// somehow.
///
/// Relies on `elf::parse` having already rejected any `PT_LOAD` segment
/// whose `[p_offset, p_offset + p_filesz)` range doesn't fit inside
/// `info.data` — every `phdr` reaching this loop is safe to slice
/// unchecked.
fn load_elf(mm: &mut Mm, info: &elf::ElfInfo<'_>) -> Result<(), KError> {
    for phdr in info.phdrs {
        if !phdr.is_load() {
            continue;
        }

        let va = VirtAddr::new(phdr.p_vaddr);
        let load_flags = segment_load_flags(phdr.p_flags);
        mm.map_range(va, phdr.p_memsz, load_flags)?;

        let file_bytes = &info.data[phdr.p_offset as usize..(phdr.p_offset + phdr.p_filesz) as usize];
        write_into_mm(mm, va, file_bytes);
        if phdr.p_memsz > phdr.p_filesz {
            let bss_start = va + phdr.p_filesz;
            zero_in_mm(mm, bss_start, phdr.p_memsz - phdr.p_filesz);
        }

        if phdr.p_flags & elf::PF_W == 0 {
            downgrade_to_read_only(mm, va, phdr.p_memsz);
        }
    }
    Ok(())
}

/// Copies `data` into `mm`'s address space starting at `va`, one page at
/// a time via the HHDM alias — `mm` need not be the active address space
/// for this to work.
fn write_into_mm(mm: &Mm, va: VirtAddr, data: &[u8]) {
    let mut written = 0usize;
    while written < data.len() {
        let page_va = VirtAddr::new((va.as_u64() + written as u64) & !(crate::config::PAGE_SIZE - 1));
        let offset_in_page = (va.as_u64() + written as u64 - page_va.as_u64()) as usize;
        let n = core::cmp::min(data.len() - written, crate::config::PAGE_SIZE as usize - offset_in_page);
        if let Some(phys) = crate::memory::vmm::translate(mm.pml4_phys, page_va) {
            // SAFETY: phys is a page this Mm owns, HHDM-mapped.
            unsafe {
                let dst = phys.to_virt().as_mut_ptr::<u8>().add(offset_in_page);
                core::ptr::copy_nonoverlapping(data[written..].as_ptr(), dst, n);
            }
        }
        written += n;
    }
}

fn zero_in_mm(mm: &Mm, va: VirtAddr, len: u64) {
    let mut done = 0u64;
    while done < len {
        let page_va = VirtAddr::new((va.as_u64() + done) & !(crate::config::PAGE_SIZE - 1));
        let offset_in_page = (va.as_u64() + done - page_va.as_u64()) as usize;
        let n = core::cmp::min((len - done) as usize, crate::config::PAGE_SIZE as usize - offset_in_page);
        if let Some(phys) = crate::memory::vmm::translate(mm.pml4_phys, page_va) {
            // SAFETY: phys is a page this Mm owns, HHDM-mapped.
            unsafe {
                let dst = phys.to_virt().as_mut_ptr::<u8>().add(offset_in_page);
                core::ptr::write_bytes(dst, 0, n);
            }
        }
        done += n as u64;
    }
}

/// Clears the page-table `WRITABLE` bit across `[va, va+len)`. The `Vma`
/// entry `map_range` recorded keeps its original, load-time flags — only
/// the PTEs backing a PF_X-only segment change, which is harmless since
/// nothing re-derives PTE flags from the `Vma` after load.
fn downgrade_to_read_only(mm: &Mm, va: VirtAddr, len: u64) {
    use crate::memory::vmm::PageTableFlags;
    let start = va.as_u64() & !(crate::config::PAGE_SIZE - 1);
    let end = (va.as_u64() + len + crate::config::PAGE_SIZE - 1) & !(crate::config::PAGE_SIZE - 1);
    let mut addr = start;
    while addr < end {
        let page_va = VirtAddr::new(addr);
        // SAFETY: page_va was just mapped by load_elf against this mm.
        unsafe {
            let _ = crate::memory::vmm::set_flags(mm.pml4_phys, page_va, |flags| {
                *flags &= !PageTableFlags::WRITABLE;
            });
        }
        crate::memory::vmm::flush(page_va);
        addr += crate::config::PAGE_SIZE;
    }
}

/// Builds a brand new user process from an ELF image, named `name`,
/// parented to `parent` (`None` for the very first, kernel-spawned init
/// process).
pub fn spawn_user_process(name: &str, elf_bytes: &[u8], parent: Option<Pid>) -> Result<Pid, KError> {
    let info = elf::parse(elf_bytes).map_err(|_| KError::InvalidArgument)?;

    let mut mm = Mm::alloc()?;
    if let Err(e) = load_elf(&mut mm, &info) {
        mm.free();
        return Err(e);
    }

    let user_stack_base = VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE);
    if let Err(e) = mm.map_range(user_stack_base, USER_STACK_SIZE, VmaFlags::READ | VmaFlags::WRITE) {
        mm.free();
        return Err(e);
    }

    let kstack = match kstack::alloc_kernel() {
        Some(s) => s,
        None => {
            mm.free();
            return Err(KError::OutOfMemory);
        }
    };

    let mut sched = SCHEDULER.lock();
    let pid = sched.alloc_pid();
    let mut pcb = Pcb::blank(pid, name, kstack);
    pcb.parent = parent;
    // SAFETY: kstack.top is freshly mapped and otherwise unused.
    pcb.rsp = unsafe { context::user_entry(kstack.top.as_u64(), info.entry, USER_STACK_TOP) };
    pcb.mm = Some(mm);
    sched.insert(pcb);
    sched.ready.push_back(pid);
    log::info!("process: spawned user process {:?} (pid {})", name, pid.0);
    Ok(pid)
}

/// Duplicates the currently running process: new pid, a deep copy of its
/// address space, and a kernel stack primed to resume exactly where the
/// parent's trap into the kernel happened, with `rax = 0`.
///
/// Returns the child's pid to the parent; the child itself observes
/// `fork` returning 0 (baked into the copied trap frame).
pub fn fork(parent_frame: &TrapFrame) -> Result<Pid, KError> {
    let kstack = kstack::alloc_kernel().ok_or(KError::OutOfMemory)?;

    let mut sched = SCHEDULER.lock();
    let current = sched.current;

    let (parent_cwd, parent_name, parent_brk, parent_brk_mapped, child_mm) = {
        let parent_pcb = sched.get(current);
        let parent_mm = match parent_pcb.mm.as_ref() {
            // fork() only makes sense for a user process; a kernel
            // thread has no per-process address space to copy.
            None => return Err(KError::InvalidArgument),
            Some(mm) => mm,
        };
        let mut child_mm = Mm::alloc()?;
        child_mm.copy_from(parent_mm)?;
        (
            parent_pcb.cwd_inode,
            parent_pcb.name.clone(),
            parent_pcb.brk,
            parent_pcb.brk_mapped,
            child_mm,
        )
    };

    let pid = sched.alloc_pid();
    let mut child_frame = *parent_frame;
    child_frame.rax = 0;

    let mut pcb = Pcb::blank(pid, &parent_name, kstack);
    pcb.parent = Some(current);
    pcb.cwd_inode = parent_cwd;
    pcb.brk = parent_brk;
    pcb.brk_mapped = parent_brk_mapped;
    pcb.trap_frame = child_frame;
    // SAFETY: kstack.top is freshly mapped and otherwise unused.
    pcb.rsp = unsafe { context::fork_child(kstack.top.as_u64(), &child_frame) };
    pcb.mm = Some(child_mm);

    // Share open-file pool entries rather than copying them: parent and
    // child keep the same seek offset until one of them closes.
    let parent_fds: Vec<Option<usize>> = sched.get(current).fd_table_slots().to_vec();
    for slot in parent_fds.iter().flatten() {
        inode::pool_share(*slot);
    }
    pcb.fd_table.fds = parent_fds;

    sched.insert(pcb);
    sched.ready.push_back(pid);
    Ok(pid)
}

/// Replaces the calling process's image with `elf_bytes`: old address
/// space torn down, a fresh one built in its place, and the trap frame
/// rewritten so the syscall return path lands at the new entry point
/// instead of back where `execve` was called from.
pub fn execve(elf_bytes: &[u8]) -> Result<(), KError> {
    let info = elf::parse(elf_bytes).map_err(|_| KError::InvalidArgument)?;

    let mut new_mm = Mm::alloc()?;
    if let Err(e) = load_elf(&mut new_mm, &info) {
        new_mm.free();
        return Err(e);
    }
    let user_stack_base = VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE);
    if let Err(e) = new_mm.map_range(user_stack_base, USER_STACK_SIZE, VmaFlags::READ | VmaFlags::WRITE) {
        new_mm.free();
        return Err(e);
    }

    let mut sched = SCHEDULER.lock();
    let current = sched.current;
    let pcb = sched.get_mut(current);

    if let Some(mut old_mm) = pcb.mm.take() {
        old_mm.free();
    }
    pcb.mm = Some(new_mm);

    pcb.trap_frame.rip = info.entry;
    pcb.trap_frame.rsp = USER_STACK_TOP;
    pcb.trap_frame.rdi = 0;
    pcb.trap_frame.rsi = 0;
    pcb.trap_frame.rdx = 0;
    pcb.brk = USER_HEAP_BASE;
    pcb.brk_mapped = USER_HEAP_BASE;

    Ok(())
}

/// `sys_brk`: `requested == 0` queries the current break; otherwise
/// grows the heap up to `requested` and returns the new break (or the
/// old one, unmoved, if the underlying mapping fails). Shrinking is
/// accepted but never unmaps memory — the next growth past the
/// previously granted high-water mark simply maps fresh pages again.
pub fn sys_brk(requested: u64) -> u64 {
    let mut sched = SCHEDULER.lock();
    let current = sched.current;
    let pcb = sched.get_mut(current);

    if requested == 0 || requested <= pcb.brk {
        if requested != 0 {
            pcb.brk = requested;
        }
        return pcb.brk;
    }

    let page_size = crate::config::PAGE_SIZE;
    let new_mapped = (requested + page_size - 1) & !(page_size - 1);
    if new_mapped > pcb.brk_mapped {
        let grow_from = VirtAddr::new(pcb.brk_mapped);
        let grow_size = new_mapped - pcb.brk_mapped;
        match pcb.mm.as_mut() {
            Some(mm) => match mm.map_range(grow_from, grow_size, VmaFlags::READ | VmaFlags::WRITE) {
                Ok(()) => pcb.brk_mapped = new_mapped,
                Err(_) => return pcb.brk,
            },
            None => return pcb.brk,
        }
    }

    pcb.brk = requested;
    pcb.brk
}

/// Marks the calling process a zombie and immediately yields. Never
/// returns: a zombie is never rescheduled, and `wait4` never actually
/// reaps it (it's a stub), so control never comes back here.
pub fn exit_current(code: i32) -> ! {
    {
        let mut sched = SCHEDULER.lock();
        let current = sched.current;
        let pcb = sched.get_mut(current);
        pcb.exit_code = code;
        pcb.state = ProcessState::Zombie;
        log::info!("process: pid {} exited with code {}", current.0, code);
    }
    loop {
        schedule();
    }
}

/// Blocks the calling process (e.g. waiting on input) and yields.
pub fn block_current() {
    {
        let mut sched = SCHEDULER.lock();
        let current = sched.current;
        sched.get_mut(current).state = ProcessState::Blocked;
    }
    schedule();
}

/// Moves `pid` from Blocked back to Ready and onto the back of the queue.
pub fn wake(pid: Pid) {
    let mut sched = SCHEDULER.lock();
    if sched.get(pid).state == ProcessState::Blocked {
        sched.get_mut(pid).state = ProcessState::Ready;
        sched.ready.push_back(pid);
    }
}

/// Voluntary yield: `sys_yield` and every blocking path call straight
/// into this.
pub fn yield_now() {
    schedule();
}

/// The PIT tick handler: advances the global clock, and — if the
/// currently running thread isn't idle — burns one tick off its time
/// slice, calling `schedule` once it hits zero.
pub fn tick() {
    crate::task::clock::tick();

    let should_schedule = {
        let mut sched = SCHEDULER.lock();
        let current = sched.current;
        if current == IDLE_PID {
            false
        } else {
            let pcb = sched.get_mut(current);
            if pcb.state == ProcessState::Running && pcb.time_slice > 0 {
                pcb.time_slice -= 1;
                pcb.total_runtime += 1;
            }
            pcb.state == ProcessState::Running && pcb.time_slice == 0
        }
    };

    if should_schedule {
        schedule();
    }
}

/// The five-step scheduling algorithm: demote the current thread if its
/// slice ran out (or it's no longer runnable), pick idle if nothing else
/// is ready, dequeue and promote the next thread (resetting its slice),
/// switch CR3/TSS if the new thread differs, and finally restore
/// whatever interrupt state was in effect before this call.
pub fn schedule() {
    let was_enabled = crate::sync::spinlock::interrupts_enabled();
    crate::sync::spinlock::disable_interrupts();

    let (prev_pid, prev_rsp_ptr, next_pid, next_rsp) = {
        let mut sched = SCHEDULER.lock();
        let prev_pid = sched.current;

        if sched.get(prev_pid).state == ProcessState::Running {
            sched.get_mut(prev_pid).state = ProcessState::Ready;
            if prev_pid != IDLE_PID {
                sched.ready.push_back(prev_pid);
            }
        }

        let next_pid = sched.ready.pop_front().unwrap_or(IDLE_PID);

        {
            let next = sched.get_mut(next_pid);
            next.state = ProcessState::Running;
            next.time_slice = TIME_SLICE_DEFAULT;
        }
        sched.current = next_pid;

        let prev_rsp_ptr = &mut sched.get_mut(prev_pid).rsp as *mut u64;
        let next_rsp = sched.get(next_pid).rsp;

        (prev_pid, prev_rsp_ptr, next_pid, next_rsp)
    };

    if next_pid != prev_pid {
        let (pml4, kstack_top) = {
            let sched = SCHEDULER.lock();
            let next = sched.get(next_pid);
            (next.pml4_phys(), next.kstack.top.as_u64())
        };
        // SAFETY: idt::init has already run by the time any thread runs.
        unsafe {
            crate::traps::idt::set_kernel_stack(kstack_top);
            if crate::arch::cpu::read_cr3() != pml4.as_u64() {
                crate::arch::cpu::write_cr3(pml4.as_u64());
            }
        }
    }

    if was_enabled {
        crate::sync::spinlock::enable_interrupts();
    }

    if next_pid != prev_pid {
        // SAFETY: prev_rsp_ptr points at the prev PCB's rsp field, not
        // borrowed any more once the lock above was dropped; next_rsp
        // was built either by a prior switch_to or one of the bootstrap
        // constructors in task::context.
        unsafe {
            context::switch_to(prev_rsp_ptr, next_rsp);
        }
    }
}

// =============================================================================
// Per-process file descriptor helpers, used by `traps::syscall`.
// =============================================================================

/// Assigns a fresh FD in the current process's table to a newly opened
/// inode, allocating a pool slot to back it.
pub fn fd_open(inode: InodeIndex) -> Result<usize, KError> {
    let pool_slot = inode::pool_alloc(inode)?;
    let mut sched = SCHEDULER.lock();
    let current = sched.current;
    let pcb = sched.get_mut(current);
    let slot = match pcb.fd_table.alloc_slot() {
        Some(s) => s,
        None => {
            drop(sched);
            inode::pool_close(pool_slot);
            return Err(KError::TooManyOpenFiles);
        }
    };
    pcb.fd_table.fds[slot] = Some(pool_slot);
    Ok(slot)
}

/// Looks up the `(inode, offset)` an FD currently points at.
pub fn fd_lookup(fd: usize) -> Option<(InodeIndex, usize)> {
    let pool_slot = {
        let sched = SCHEDULER.lock();
        let pcb = sched.get(sched.current);
        *pcb.fd_table.fds.get(fd)?
    }?;
    inode::pool_inode_offset(pool_slot)
}

/// Advances an FD's seek offset after a successful read/write.
pub fn fd_advance(fd: usize, delta: usize) {
    let pool_slot = {
        let sched = SCHEDULER.lock();
        let pcb = sched.get(sched.current);
        pcb.fd_table.fds.get(fd).copied().flatten()
    };
    if let Some(slot) = pool_slot {
        inode::pool_advance(slot, delta);
    }
}

/// Sets an FD's seek offset to an absolute value, used by `getdents64`
/// whose cursor is a scan position rather than a byte count.
pub fn fd_advance_to(fd: usize, offset: usize) {
    let pool_slot = {
        let sched = SCHEDULER.lock();
        let pcb = sched.get(sched.current);
        pcb.fd_table.fds.get(fd).copied().flatten()
    };
    if let Some(slot) = pool_slot {
        inode::pool_set_offset(slot, offset);
    }
}

/// Closes an FD in the current process's table, dropping the pool's
/// reference count and freeing it once it reaches zero.
pub fn fd_close(fd: usize) -> Result<(), KError> {
    let mut sched = SCHEDULER.lock();
    let current = sched.current;
    let pcb = sched.get_mut(current);
    let pool_slot = pcb.fd_table.fds.get(fd).copied().flatten().ok_or(KError::NotFound)?;
    pcb.fd_table.fds[fd] = None;
    drop(sched);
    inode::pool_close(pool_slot);
    Ok(())
}

/// Reads the calling process's current working directory inode.
pub fn current_cwd() -> InodeIndex {
    let sched = SCHEDULER.lock();
    sched.get(sched.current).cwd_inode
}

/// Updates the calling process's current working directory.
pub fn set_current_cwd(inode: InodeIndex) {
    let mut sched = SCHEDULER.lock();
    let current = sched.current;
    sched.get_mut(current).cwd_inode = inode;
}

/// Returns a pointer to the calling process's trap frame, for syscalls
/// (`fork`, `execve`) that need to rewrite it in place.
pub fn current_trap_frame_mut() -> *mut TrapFrame {
    let mut sched = SCHEDULER.lock();
    let current = sched.current;
    &mut sched.get_mut(current).trap_frame as *mut TrapFrame
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn segment_load_flags_grants_write_always_and_exec_only_for_pf_x() {
        let data_flags = segment_load_flags(elf::PF_W);
        assert!(data_flags.contains(VmaFlags::WRITE));
        assert!(!data_flags.contains(VmaFlags::EXEC));

        let text_flags = segment_load_flags(elf::PF_X);
        assert!(text_flags.contains(VmaFlags::WRITE));
        assert!(text_flags.contains(VmaFlags::EXEC));
    }
}
