//! Block headers and their sentinels.

use core::ptr::NonNull;

/// Magic of an allocated block.
pub const HEAP_MAGIC: u32 = 0xDEAD_BEEF;

/// Magic of a free block.
pub const HEAP_FREE_MAGIC: u32 = 0xFEED_FACE;

/// Payload sizes and addresses are multiples of this.
pub const HEAP_ALIGNMENT: usize = 8;

/// Smallest payload a split may leave behind.
pub const MIN_BLOCK_SIZE: usize = 16;

pub(crate) type Link = Option<NonNull<BlockHeader>>;

/// Precedes every block in the heap extent.
///
/// Every field accepts any bit pattern, so a header can be read from
/// arbitrary heap memory before its magic has been checked.
#[repr(C, align(8))]
#[derive(Copy, Clone, Debug)]
pub(crate) struct BlockHeader {
    pub magic: u32,
    free: u32,
    /// Payload bytes, header excluded.
    pub size: usize,
    /// Size-class free list.
    pub next: Link,
    pub prev: Link,
    /// Every block, in address order.
    pub next_all: Link,
    pub prev_all: Link,
}

/// Bytes taken by one header.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % HEAP_ALIGNMENT == 0);

impl BlockHeader {
    pub const fn new_free(size: usize) -> Self {
        Self {
            magic: HEAP_FREE_MAGIC,
            free: 1,
            size,
            next: None,
            prev: None,
            next_all: None,
            prev_all: None,
        }
    }

    #[inline]
    pub const fn is_free(&self) -> bool {
        self.free != 0
    }

    pub const fn mark_free(&mut self) {
        self.magic = HEAP_FREE_MAGIC;
        self.free = 1;
    }

    pub const fn mark_allocated(&mut self) {
        self.magic = HEAP_MAGIC;
        self.free = 0;
    }

    /// Destroy the sentinel of a header that was merged into a neighbour.
    pub const fn poison(&mut self) {
        self.magic = 0;
        self.free = 0;
    }

    /// The magic agrees with the free flag.
    pub const fn is_consistent(&self) -> bool {
        matches!(
            (self.magic, self.is_free()),
            (HEAP_MAGIC, false) | (HEAP_FREE_MAGIC, true)
        )
    }

    #[inline]
    pub fn addr(block: NonNull<Self>) -> usize {
        block.as_ptr() as usize
    }

    #[inline]
    pub fn payload(block: NonNull<Self>) -> NonNull<u8> {
        // SAFETY: the payload directly follows the header in the same extent.
        unsafe { block.cast::<u8>().add(HEADER_SIZE) }
    }
}

/// Round `size` up to [`HEAP_ALIGNMENT`], `None` on overflow.
#[inline]
pub const fn align_size(size: usize) -> Option<usize> {
    match size.checked_add(HEAP_ALIGNMENT - 1) {
        Some(v) => Some(v & !(HEAP_ALIGNMENT - 1)),
        None => None,
    }
}
