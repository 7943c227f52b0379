//! The kernel heap's page source, and the combined memory report.

use core::fmt;
use core::ptr::NonNull;
use kernel_alloc::frame_alloc::PmmStats;
use kernel_alloc::heap::HeapStats;
use kernel_alloc::pages::PageProvider;
use kernel_alloc::vmm::{Vmm, VmmStats};
use kernel_registers::Platform;
use kernel_vmem::PhysMapper;

/// Where the kernel heap gets whole pages from, given the live VMM.
///
/// # Safety
/// Same contract as [`PageProvider`]: returned pages are 4 KiB aligned,
/// writable, and exclusively owned until freed.
pub unsafe trait HeapPages {
    fn alloc_pages<M: PhysMapper, P: Platform>(
        &mut self,
        vmm: &mut Vmm<'_, M, P>,
        count: usize,
    ) -> Option<NonNull<u8>>;

    fn free_pages<M: PhysMapper, P: Platform>(
        &mut self,
        vmm: &mut Vmm<'_, M, P>,
        ptr: NonNull<u8>,
        count: usize,
    );
}

/// Pages from the VMM's kernel heap window at `0xD000_0000`.
#[derive(Debug, Default, Copy, Clone)]
pub struct HeapWindow;

// SAFETY: the VMM maps fresh writable frames for every page it hands out.
unsafe impl HeapPages for HeapWindow {
    fn alloc_pages<M: PhysMapper, P: Platform>(
        &mut self,
        vmm: &mut Vmm<'_, M, P>,
        count: usize,
    ) -> Option<NonNull<u8>> {
        PageProvider::alloc_pages(vmm, count)
    }

    fn free_pages<M: PhysMapper, P: Platform>(
        &mut self,
        vmm: &mut Vmm<'_, M, P>,
        ptr: NonNull<u8>,
        count: usize,
    ) {
        PageProvider::free_pages(vmm, ptr, count);
    }
}

#[cfg(any(test, feature = "hosted"))]
// SAFETY: forwards to the host allocator, which upholds the page contract.
unsafe impl HeapPages for kernel_alloc::pages::HostPageProvider {
    fn alloc_pages<M: PhysMapper, P: Platform>(
        &mut self,
        _vmm: &mut Vmm<'_, M, P>,
        count: usize,
    ) -> Option<NonNull<u8>> {
        PageProvider::alloc_pages(self, count)
    }

    fn free_pages<M: PhysMapper, P: Platform>(
        &mut self,
        _vmm: &mut Vmm<'_, M, P>,
        ptr: NonNull<u8>,
        count: usize,
    ) {
        PageProvider::free_pages(self, ptr, count);
    }
}

/// The VMM together with the heap's page source. The heap owns this.
pub struct KernelMemory<'m, M: PhysMapper, P: Platform, H: HeapPages> {
    pub(crate) vmm: Vmm<'m, M, P>,
    pub(crate) pages: H,
}

// SAFETY: `H` upholds the page contract.
unsafe impl<M: PhysMapper, P: Platform, H: HeapPages> PageProvider for KernelMemory<'_, M, P, H> {
    fn alloc_pages(&mut self, count: usize) -> Option<NonNull<u8>> {
        self.pages.alloc_pages(&mut self.vmm, count)
    }

    fn free_pages(&mut self, ptr: NonNull<u8>, count: usize) {
        self.pages.free_pages(&mut self.vmm, ptr, count);
    }
}

/// Frame, paging and heap statistics in one printout.
#[derive(Debug, Copy, Clone)]
pub struct MemoryReport {
    pub pmm: PmmStats,
    pub vmm: VmmStats,
    pub heap: HeapStats,
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Memory Statistics ===")?;
        write!(f, "{}", self.pmm)?;
        write!(f, "{}", self.vmm)?;
        write!(f, "{}", self.heap)
    }
}
