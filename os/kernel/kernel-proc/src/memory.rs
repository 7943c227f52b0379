use core::ptr::NonNull;
use kernel_alloc::heap::Heap;
use kernel_alloc::pages::PageProvider;

/// Where process stacks and heap grants come from.
pub trait ProcessMemory {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Release memory obtained from [`allocate`](Self::allocate).
    fn release(&mut self, ptr: NonNull<u8>);
}

impl<P: PageProvider> ProcessMemory for Heap<P> {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.alloc(size)
    }

    fn release(&mut self, ptr: NonNull<u8>) {
        self.free(ptr);
    }
}
