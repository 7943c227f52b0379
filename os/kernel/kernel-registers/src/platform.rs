use crate::context::CpuContext;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Everything the memory manager and the scheduler need from the CPU.
///
/// Allocator and scheduler logic never executes architecture-specific
/// instructions directly; it goes through this trait. [`X86Platform`](crate::X86Platform)
/// is the real implementation, [`HostedPlatform`](crate::HostedPlatform) records
/// the calls for tests.
pub trait Platform {
    /// Make `directory` the active page directory (write CR3).
    ///
    /// # Safety
    /// `directory` must be a complete page directory. Once paging is enabled
    /// it must map the code and stack that are currently executing.
    unsafe fn load_page_directory(&self, directory: PhysicalPage<Size4K>);

    /// The page directory currently loaded in CR3.
    fn page_directory(&self) -> PhysicalPage<Size4K>;

    /// Set CR0.PG.
    ///
    /// # Safety
    /// A page directory that identity maps the executing code must already be loaded.
    unsafe fn enable_paging(&self);

    fn paging_enabled(&self) -> bool;

    /// Invalidate the TLB entry of the page containing `va` (`invlpg`).
    fn flush_tlb_entry(&self, va: VirtualAddress);

    fn interrupts_enabled(&self) -> bool;

    /// Clear IF (`cli`).
    fn disable_interrupts(&self);

    /// Set IF (`sti`).
    fn enable_interrupts(&self);

    /// # Safety
    /// Port reads can have device side effects.
    unsafe fn read_port(&self, port: u16) -> u8;

    /// # Safety
    /// Port writes can have device side effects.
    unsafe fn write_port(&self, port: u16, value: u8);

    /// Save the running context into `save` and continue with `load`.
    ///
    /// Returns when some later switch loads the context stored in `save`.
    ///
    /// # Safety
    /// Both pointers must be valid for the duration of the switch and `load`
    /// must describe a context with a mapped stack and code.
    unsafe fn switch_context(&self, save: *mut CpuContext, load: *const CpuContext);

    /// Continue with `load` without saving the running context.
    ///
    /// On hardware this does not return.
    ///
    /// # Safety
    /// Same as [`switch_context`](Self::switch_context) for `load`.
    unsafe fn resume_context(&self, load: *const CpuContext);
}
