//! # Direct-Map PhysMapper
//!
//! Physical memory is reachable two ways during the kernel's life:
//!
//! - before paging, physical addresses are used as they are;
//! - after [`Vmm::init`](crate::vmm::Vmm::init), every frame the allocator
//!   manages is mapped again at `KERNEL_VIRTUAL_BASE + pa`.
//!
//! [`DirectMapPhysMapper`] starts with the identity view and switches to the
//! higher-half view when the VMM reports that paging is on.

use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::memory::KERNEL_VIRTUAL_BASE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for the kernel's own view of physical memory.
///
/// # Safety
/// - Before paging, the referenced frame must be addressable as is.
/// - After paging, the frame must lie inside the higher-half direct map.
#[derive(Debug)]
pub struct DirectMapPhysMapper {
    offset: AtomicU32,
}

impl DirectMapPhysMapper {
    /// A mapper in identity mode.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            offset: AtomicU32::new(0),
        }
    }

    /// The virtual address `pa` is currently reachable at.
    #[must_use]
    pub fn virtual_address(&self, pa: PhysicalAddress) -> usize {
        pa.as_u32().wrapping_add(self.offset.load(Ordering::Acquire)) as usize
    }

    #[must_use]
    pub fn is_higher_half(&self) -> bool {
        self.offset.load(Ordering::Acquire) != 0
    }
}

impl Default for DirectMapPhysMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysMapper for DirectMapPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = self.virtual_address(pa) as *mut T;
        // SAFETY: the caller guarantees `pa` is reachable in the current view.
        unsafe { &mut *va }
    }

    fn on_paging_enabled(&self) {
        self.offset
            .store(KERNEL_VIRTUAL_BASE.as_u32(), Ordering::Release);
        log::debug!("physical memory now reached through {KERNEL_VIRTUAL_BASE}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_to_the_higher_half_view() {
        let mapper = DirectMapPhysMapper::new();
        let pa = PhysicalAddress::new(0x0020_3000);
        assert_eq!(mapper.virtual_address(pa), 0x0020_3000);
        assert!(!mapper.is_higher_half());

        mapper.on_paging_enabled();
        assert!(mapper.is_higher_half());
        assert_eq!(mapper.virtual_address(pa), 0xC020_3000);
    }
}
