//! A heap-backed stand-in for physical memory, for hosted builds and tests.

use crate::PhysMapper;
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::ptr::NonNull;
use kernel_memory_addresses::PhysicalAddress;

/// Maps physical address `pa` to `base + pa` inside one zeroed,
/// 4 KiB-aligned host allocation covering `[0, bytes)`.
pub struct ArenaPhysMapper {
    base: NonNull<u8>,
    layout: Layout,
}

impl ArenaPhysMapper {
    /// # Panics
    /// If `bytes` is zero or not a multiple of 4096.
    #[must_use]
    pub fn new(bytes: u32) -> Self {
        assert!(bytes > 0 && bytes % 4096 == 0, "arena must be whole frames");
        let Ok(layout) = Layout::from_size_align(bytes as usize, 4096) else {
            panic!("invalid arena layout");
        };
        // SAFETY: non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Self { base, layout }
    }

    /// Bytes of simulated physical memory.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Read a byte of simulated physical memory.
    ///
    /// # Panics
    /// If `pa` is outside the arena.
    #[must_use]
    pub fn read_byte(&self, pa: PhysicalAddress) -> u8 {
        assert!(pa.as_usize() < self.len(), "{pa:?} outside arena");
        // SAFETY: in bounds of the live allocation.
        unsafe { *self.base.as_ptr().add(pa.as_usize()) }
    }
}

impl PhysMapper for ArenaPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let end = pa.as_usize() + size_of::<T>();
        assert!(end <= self.len(), "{pa:?} outside arena");
        // SAFETY: in bounds; the caller guarantees alignment and exclusivity.
        unsafe { &mut *self.base.as_ptr().add(pa.as_usize()).cast::<T>() }
    }
}

impl Drop for ArenaPhysMapper {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) }
    }
}
