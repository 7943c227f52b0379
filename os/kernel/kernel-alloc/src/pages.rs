//! Whole-page backing for the heap.

use core::ptr::NonNull;

/// A source of page-aligned, page-granular memory.
///
/// # Safety
/// A pointer returned by [`alloc_pages`](Self::alloc_pages) must be 4 KiB
/// aligned, readable and writable for `count * 4096` bytes, and not handed
/// out again until it is passed back to [`free_pages`](Self::free_pages).
pub unsafe trait PageProvider {
    /// Allocate `count` consecutive pages.
    fn alloc_pages(&mut self, count: usize) -> Option<NonNull<u8>>;

    /// Return pages obtained from [`alloc_pages`](Self::alloc_pages).
    fn free_pages(&mut self, ptr: NonNull<u8>, count: usize);
}

#[cfg(any(test, feature = "hosted"))]
pub use hosted::HostPageProvider;

#[cfg(any(test, feature = "hosted"))]
mod hosted {
    use super::PageProvider;
    use alloc::alloc::{Layout, alloc_zeroed, dealloc};
    use alloc::vec::Vec;
    use core::ptr::NonNull;
    use kernel_info::memory::PAGE_SIZE;

    const PAGE: usize = PAGE_SIZE as usize;

    /// Serves pages from the host allocator, with an optional page budget.
    #[derive(Debug, Default)]
    pub struct HostPageProvider {
        outstanding: Vec<(NonNull<u8>, usize)>,
        limit: Option<usize>,
    }

    impl HostPageProvider {
        #[must_use]
        pub const fn new() -> Self {
            Self {
                outstanding: Vec::new(),
                limit: None,
            }
        }

        /// Refuse requests once `pages` pages are outstanding.
        #[must_use]
        pub const fn with_limit(pages: usize) -> Self {
            Self {
                outstanding: Vec::new(),
                limit: Some(pages),
            }
        }

        /// Pages currently handed out.
        #[must_use]
        pub fn pages_outstanding(&self) -> usize {
            self.outstanding.iter().map(|(_, n)| n).sum()
        }

        fn layout(count: usize) -> Option<Layout> {
            Layout::from_size_align(count.checked_mul(PAGE)?, PAGE).ok()
        }
    }

    // SAFETY: every block is a fresh zeroed host allocation of the requested
    // size with page alignment, tracked until it is returned.
    unsafe impl PageProvider for HostPageProvider {
        fn alloc_pages(&mut self, count: usize) -> Option<NonNull<u8>> {
            if count == 0 {
                return None;
            }
            if let Some(limit) = self.limit
                && self.pages_outstanding() + count > limit
            {
                return None;
            }
            let layout = Self::layout(count)?;
            // SAFETY: non-zero size.
            let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
            self.outstanding.push((ptr, count));
            Some(ptr)
        }

        fn free_pages(&mut self, ptr: NonNull<u8>, count: usize) {
            let Some(pos) = self
                .outstanding
                .iter()
                .position(|&(p, n)| p == ptr && n == count)
            else {
                log::warn!("host pages: ignoring unknown free of {ptr:p}");
                return;
            };
            self.outstanding.swap_remove(pos);
            if let Some(layout) = Self::layout(count) {
                // SAFETY: allocated above with this layout.
                unsafe { dealloc(ptr.as_ptr(), layout) };
            }
        }
    }

    impl Drop for HostPageProvider {
        fn drop(&mut self) {
            for (ptr, count) in self.outstanding.drain(..) {
                if let Some(layout) = Self::layout(count) {
                    // SAFETY: allocated in `alloc_pages` with this layout.
                    unsafe { dealloc(ptr.as_ptr(), layout) };
                }
            }
        }
    }

    // SAFETY: the provider exclusively owns its outstanding host blocks.
    unsafe impl Send for HostPageProvider {}
}
