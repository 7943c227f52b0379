//! The kernel object: one owner for the frame allocator, the VMM, the heap
//! and the scheduler.

use crate::config::{KernelConfig, ms_to_ticks};
use crate::memory::{HeapPages, KernelMemory, MemoryReport};
use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use kernel_alloc::frame_alloc::{BitmapFrameAlloc, FrameAllocError};
use kernel_alloc::heap::{HEAP_ALIGNMENT, Heap, HeapError};
use kernel_alloc::vmm::{Vmm, VmmError};
use kernel_proc::{
    ContextSwitch, MemoryRegion, Pid, Priority, ProcessError, ProcessState, ScheduleOutcome,
    Scheduler,
};
use kernel_registers::Platform;
use kernel_vmem::PhysMapper;
use log::info;

/// The kernel heap, fed by the VMM.
pub type KernelHeap<'m, M, P, H> = Heap<KernelMemory<'m, M, P, H>>;

/// A boot stage failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelInitError {
    #[error("physical memory manager: {0}")]
    Frames(#[from] FrameAllocError),
    #[error("virtual memory manager: {0}")]
    Paging(#[from] VmmError),
    #[error("kernel heap: {0}")]
    Heap(#[from] HeapError),
}

/// The booted memory and process core.
///
/// Every method assumes the caller already holds off the timer interrupt;
/// [`SharedKernel`](crate::SharedKernel) does that.
pub struct Kernel<'m, M: PhysMapper, P: Platform, H: HeapPages> {
    config: KernelConfig,
    heap: KernelHeap<'m, M, P, H>,
    scheduler: Scheduler,
}

impl<'m, M: PhysMapper, P: Platform, H: HeapPages> Kernel<'m, M, P, H> {
    /// Bring up the frame allocator, paging, the heap and the scheduler, in
    /// that order.
    ///
    /// # Errors
    /// The first stage that fails, as a [`KernelInitError`].
    pub fn boot(
        config: KernelConfig,
        mapper: &'m M,
        platform: &'m P,
        heap_pages: H,
    ) -> Result<Self, KernelInitError> {
        info!("Initializing physical memory manager");
        let mut frames = BitmapFrameAlloc::new();
        match config.memory_map {
            Some(map) => frames.init_from_memory_map(config.pmm, map)?,
            None => frames.init(config.pmm)?,
        }
        info!(
            "PMM: {} frames, {} KiB free",
            frames.total_frames(),
            frames.free_memory() / 1024
        );

        info!("Initializing virtual memory manager");
        let memory_end = frames.memory_end();
        let mut vmm = Vmm::new(mapper, platform, frames);
        let directory = vmm.init_with_memory_end(memory_end)?;
        info!("Paging enabled, kernel directory at {directory}");

        info!("Initializing kernel heap ({} KiB)", config.heap.size / 1024);
        let mut heap = Heap::new(KernelMemory {
            vmm,
            pages: heap_pages,
        });
        heap.init(config.heap)?;

        info!("Initializing scheduler");
        let scheduler = Scheduler::new();

        info!("Kernel initialized");
        Ok(Self {
            config,
            heap,
            scheduler,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn heap(&self) -> &KernelHeap<'m, M, P, H> {
        &self.heap
    }

    pub const fn heap_mut(&mut self) -> &mut KernelHeap<'m, M, P, H> {
        &mut self.heap
    }

    #[must_use]
    pub const fn vmm(&self) -> &Vmm<'m, M, P> {
        &self.heap.pages().vmm
    }

    pub const fn vmm_mut(&mut self) -> &mut Vmm<'m, M, P> {
        &mut self.heap.pages_mut().vmm
    }

    #[must_use]
    pub const fn frames(&self) -> &BitmapFrameAlloc {
        self.vmm().frames()
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn platform(&self) -> &'m P {
        self.vmm().platform()
    }

    /// Heap pages backing, e.g. to inspect a hosted provider.
    #[must_use]
    pub const fn heap_pages(&self) -> &H {
        &self.heap.pages().pages
    }

    pub fn kmalloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.heap.alloc(size)
    }

    /// Foreign or double frees are ignored with a warning.
    pub fn kfree(&mut self, ptr: NonNull<u8>) {
        self.heap.free(ptr);
    }

    pub fn krealloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        self.heap.realloc(ptr, size)
    }

    pub fn kcalloc(&mut self, n: usize, size: usize) -> Option<NonNull<u8>> {
        self.heap.calloc(n, size)
    }

    pub fn kmalloc_dma(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.heap.alloc_dma(size)
    }

    pub fn aligned_alloc(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.heap.aligned_alloc(size, alignment)
    }

    pub fn aligned_free(&mut self, ptr: NonNull<u8>) {
        self.heap.aligned_free(ptr);
    }

    /// Allocate for a [`Layout`], going through the aligned path only when
    /// the heap's natural alignment is not enough.
    pub fn alloc_layout(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.align() <= HEAP_ALIGNMENT {
            self.heap.alloc(layout.size())
        } else {
            self.heap.aligned_alloc(layout.size(), layout.align())
        }
    }

    /// Release memory from [`alloc_layout`](Self::alloc_layout) with the same layout.
    pub fn free_layout(&mut self, ptr: NonNull<u8>, layout: Layout) {
        if layout.align() <= HEAP_ALIGNMENT {
            self.heap.free(ptr);
        } else {
            self.heap.aligned_free(ptr);
        }
    }

    /// Walk the heap and stop the kernel if its bookkeeping is damaged.
    ///
    /// # Panics
    /// If [`Heap::validate`] reports corruption.
    pub fn check_heap(&self) {
        if let Err(corruption) = self.heap.validate() {
            panic!("kernel heap corrupted: {corruption}");
        }
    }

    #[must_use]
    pub fn memory_report(&self) -> MemoryReport {
        MemoryReport {
            pmm: self.frames().stats(),
            vmm: self.vmm().stats(),
            heap: self.heap.stats(),
        }
    }

    /// # Errors
    /// [`ProcessError::TableFull`] or [`ProcessError::OutOfMemory`].
    pub fn create_process(
        &mut self,
        name: &str,
        entry_point: usize,
        priority: Priority,
    ) -> Result<Pid, ProcessError> {
        self.scheduler
            .create(&mut self.heap, name, entry_point, priority)
    }

    /// # Errors
    /// [`ProcessError::NotFound`] or [`ProcessError::Protected`].
    pub fn kill(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.scheduler.kill(&mut self.heap, pid)
    }

    /// # Errors
    /// See [`Scheduler::kill_with_signal`].
    pub fn kill_with_signal(&mut self, pid: Pid, signal: i32) -> Result<(), ProcessError> {
        self.scheduler.kill_with_signal(pid, signal)
    }

    /// # Errors
    /// See [`Scheduler::set_state`].
    pub fn set_state(&mut self, pid: Pid, state: ProcessState) -> Result<(), ProcessError> {
        self.scheduler.set_state(pid, state)
    }

    pub fn schedule(&mut self) -> ScheduleOutcome {
        self.scheduler.schedule()
    }

    /// One timer interrupt's worth of accounting, then a scheduling decision.
    pub fn scheduler_tick(&mut self) -> ScheduleOutcome {
        self.scheduler.tick()
    }

    /// Resolve a decision into the contexts to swap, if any.
    pub fn context_switch(&mut self, outcome: &ScheduleOutcome) -> Option<ContextSwitch> {
        self.scheduler.context_switch(outcome)
    }

    #[must_use]
    pub const fn getpid(&self) -> Option<Pid> {
        self.scheduler.getpid()
    }

    fn current_pid(&self) -> Result<Pid, ProcessError> {
        self.scheduler.getpid().ok_or(ProcessError::NoCurrentProcess)
    }

    /// Duplicate the running process.
    ///
    /// # Errors
    /// [`ProcessError::NoCurrentProcess`], or anything [`Scheduler::fork`] reports.
    pub fn fork(&mut self) -> Result<Pid, ProcessError> {
        let parent = self.current_pid()?;
        self.scheduler.fork(&mut self.heap, parent)
    }

    /// Terminate the running process with `code`.
    ///
    /// # Errors
    /// See [`Scheduler::exit`].
    pub fn exit(&mut self, code: i32) -> Result<Pid, ProcessError> {
        self.scheduler.exit(code)
    }

    /// Reap a terminated child of the running process.
    ///
    /// # Errors
    /// [`ProcessError::NoCurrentProcess`] or [`ProcessError::NoChildren`].
    pub fn wait(&mut self) -> Result<Option<(Pid, i32)>, ProcessError> {
        let parent = self.current_pid()?;
        self.scheduler.wait(&mut self.heap, parent)
    }

    /// Block the running process for at least `ms` milliseconds and pick
    /// the next one.
    ///
    /// # Errors
    /// [`ProcessError::NoCurrentProcess`], or anything [`Scheduler::sleep`] reports.
    pub fn sleep(&mut self, ms: u64) -> Result<ScheduleOutcome, ProcessError> {
        let pid = self.current_pid()?;
        self.scheduler.sleep(pid, ms_to_ticks(ms))?;
        Ok(self.scheduler.schedule())
    }

    /// # Errors
    /// See [`Scheduler::wake`].
    pub fn wake(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.scheduler.wake(pid)
    }

    /// Free a terminated process's slot.
    ///
    /// # Errors
    /// See [`Scheduler::reclaim`].
    pub fn reclaim(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.scheduler.reclaim(&mut self.heap, pid)
    }

    /// # Errors
    /// [`ProcessError::NotFound`] or [`ProcessError::OutOfMemory`].
    pub fn grant_heap(&mut self, pid: Pid, size: usize) -> Result<MemoryRegion, ProcessError> {
        self.scheduler.grant_heap(&mut self.heap, pid, size)
    }
}

impl<M: PhysMapper, P: Platform, H: HeapPages> fmt::Debug for Kernel<'_, M, P, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("frames", self.frames())
            .field("heap", &self.heap)
            .field("processes", &self.scheduler.len())
            .field("current", &self.scheduler.getpid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::heap::HeapConfig;
    use kernel_alloc::pages::HostPageProvider;
    use kernel_proc::{KILLED_EXIT_CODE, SIGKILL};
    use kernel_registers::HostedPlatform;
    use kernel_vmem::ArenaPhysMapper;

    const MIB: u32 = 1024 * 1024;

    fn boot<'m>(
        mapper: &'m ArenaPhysMapper,
        platform: &'m HostedPlatform,
    ) -> Kernel<'m, ArenaPhysMapper, HostedPlatform, HostPageProvider> {
        let config = KernelConfig {
            heap: HeapConfig {
                size: 64 * 1024,
                ..HeapConfig::default()
            },
            ..KernelConfig::default()
        };
        Kernel::boot(config, mapper, platform, HostPageProvider::new()).unwrap()
    }

    #[test]
    fn boot_turns_paging_on_and_keeps_the_heap_sound() {
        let mapper = ArenaPhysMapper::new(16 * MIB);
        let platform = HostedPlatform::new();
        let kernel = boot(&mapper, &platform);

        assert!(platform.paging_enabled());
        assert_eq!(kernel.getpid(), Some(Pid::IDLE));
        assert_eq!(kernel.heap().stats().total_size, 64 * 1024);
        assert!(kernel.heap_pages().pages_outstanding() > 0);
        kernel.check_heap();
    }

    #[test]
    fn failing_stage_is_reported() {
        let mapper = ArenaPhysMapper::new(16 * MIB);
        let platform = HostedPlatform::new();
        let config = KernelConfig {
            heap: HeapConfig {
                size: 0,
                ..HeapConfig::default()
            },
            ..KernelConfig::default()
        };
        let err = Kernel::boot(config, &mapper, &platform, HostPageProvider::new()).unwrap_err();
        assert!(matches!(err, KernelInitError::Heap(HeapError::InvalidSize(0))));
    }

    #[test]
    fn kmalloc_surface() {
        let mapper = ArenaPhysMapper::new(16 * MIB);
        let platform = HostedPlatform::new();
        let mut kernel = boot(&mapper, &platform);

        let a = kernel.kmalloc(100).unwrap();
        let z = kernel.kcalloc(4, 16).unwrap();
        // SAFETY: 64 zeroed bytes were just allocated.
        let zeroed = unsafe { core::slice::from_raw_parts(z.as_ptr(), 64) };
        assert!(zeroed.iter().all(|&b| b == 0));

        let grown = kernel.krealloc(Some(a), 2000).unwrap();
        let aligned = kernel.aligned_alloc(100, 256).unwrap();
        assert_eq!(aligned.as_ptr() as usize % 256, 0);
        let dma = kernel.kmalloc_dma(32).unwrap();

        kernel.kfree(grown);
        kernel.kfree(z);
        kernel.kfree(dma);
        kernel.aligned_free(aligned);
        kernel.check_heap();
        assert_eq!(kernel.heap().stats().used_size, 0);
    }

    #[test]
    fn layouts_pick_the_aligned_path_when_needed() {
        let mapper = ArenaPhysMapper::new(16 * MIB);
        let platform = HostedPlatform::new();
        let mut kernel = boot(&mapper, &platform);

        let small = Layout::from_size_align(24, 4).unwrap();
        let page = Layout::from_size_align(100, 4096).unwrap();
        let a = kernel.alloc_layout(small).unwrap();
        let b = kernel.alloc_layout(page).unwrap();
        assert_eq!(a.as_ptr() as usize % HEAP_ALIGNMENT, 0);
        assert_eq!(b.as_ptr() as usize % 4096, 0);

        kernel.free_layout(b, page);
        kernel.free_layout(a, small);
        kernel.check_heap();
        assert_eq!(kernel.heap().stats().used_size, 0);
    }

    #[test]
    fn sleep_blocks_the_caller_until_the_deadline() {
        let mapper = ArenaPhysMapper::new(16 * MIB);
        let platform = HostedPlatform::new();
        let mut kernel = boot(&mapper, &platform);

        let worker = kernel
            .create_process("worker", 0x0040_0000, Priority::Normal)
            .unwrap();
        assert_eq!(kernel.schedule().next, worker);

        // 30 ms at 100 Hz is 3 ticks
        let outcome = kernel.sleep(30).unwrap();
        assert_eq!(outcome.next, Pid::IDLE);
        assert_eq!(
            kernel.scheduler().get(worker).unwrap().state(),
            ProcessState::Blocked
        );
        kernel.scheduler_tick();
        kernel.scheduler_tick();
        assert_eq!(kernel.scheduler_tick().next, worker);
    }

    #[test]
    fn fork_and_wait_use_the_running_process() {
        let mapper = ArenaPhysMapper::new(16 * MIB);
        let platform = HostedPlatform::new();
        let mut kernel = boot(&mapper, &platform);

        let shell = kernel
            .create_process("shell", 0x0040_0000, Priority::Normal)
            .unwrap();
        kernel.schedule();
        let child = kernel.fork().unwrap();
        assert_eq!(kernel.scheduler().get(child).unwrap().parent(), Some(shell));
        assert_eq!(kernel.wait(), Ok(None));

        kernel.kill_with_signal(child, SIGKILL).unwrap();
        assert_eq!(kernel.wait(), Ok(Some((child, KILLED_EXIT_CODE))));
        assert_eq!(kernel.wait(), Err(ProcessError::NoChildren));
    }

    #[test]
    fn report_combines_all_three_layers() {
        let mapper = ArenaPhysMapper::new(16 * MIB);
        let platform = HostedPlatform::new();
        let kernel = boot(&mapper, &platform);
        let text = std::format!("{}", kernel.memory_report());
        assert!(text.starts_with("=== Memory Statistics ==="));
        assert!(text.contains("Physical memory:"));
        assert!(text.contains("Paging: enabled"));
        assert!(text.contains("Heap statistics:"));
    }
}
