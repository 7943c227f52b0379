//! # Segregated Free-List Heap
//!
//! The heap takes one extent of whole pages from a [`PageProvider`] and carves
//! it into blocks. Every block starts with a header carrying a magic number,
//! its payload size, a free flag, links for its size-class free list, and
//! links for the address-ordered list of all blocks.
//!
//! ```text
//! extent start                                                     extent end
//! +--------+---------+--------+----------------+--------+---------+
//! | header | payload | header |    payload     | header | payload |
//! +--------+---------+--------+----------------+--------+---------+
//!   alloc              free                      alloc
//! ```
//!
//! Requests above [`LARGE_BLOCK_SIZE`] bypass the blocks and are served as
//! whole pages straight from the provider; a side table remembers them.
//!
//! A header is only trusted after its magic matches: [`HEAP_MAGIC`] for an
//! allocated block, [`HEAP_FREE_MAGIC`] for a free one. Frees of pointers
//! that fail the checks are ignored.
//!
//! ```rust,ignore
//! use kernel_alloc::heap::{Heap, HeapConfig};
//! use kernel_alloc::pages::HostPageProvider;
//!
//! let mut heap = Heap::new(HostPageProvider::new());
//! heap.init(HeapConfig::default()).unwrap();
//! let p = heap.alloc(100).unwrap();
//! heap.free(p);
//! assert!(heap.validate().is_ok());
//! ```

mod block;
mod size_class;
mod stats;
mod strategy;

pub use block::{HEADER_SIZE, HEAP_ALIGNMENT, HEAP_FREE_MAGIC, HEAP_MAGIC, MIN_BLOCK_SIZE};
pub use size_class::{LARGE_BLOCK_SIZE, MEDIUM_BLOCK_SIZE, SMALL_BLOCK_SIZE, SizeClass};
pub use stats::{ClassStats, HeapStats};
pub use strategy::AllocStrategy;

use crate::large::{LargeAllocation, LargeTable};
use crate::pages::PageProvider;
use block::{BlockHeader, Link, align_size};
use core::fmt;
use core::ptr::{self, NonNull};
use kernel_info::memory::{INITIAL_HEAP_SIZE, PAGE_SIZE};

pub(crate) const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Heap size and block selection strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Extent size in bytes, rounded up to whole pages.
    pub size: usize,
    pub strategy: AllocStrategy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            size: INITIAL_HEAP_SIZE as usize,
            strategy: AllocStrategy::FirstFit,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("heap already initialized")]
    AlreadyInitialized,
    #[error("heap size {0} cannot hold a single block")]
    InvalidSize(usize),
    #[error("page provider could not supply {0} pages")]
    OutOfPages(usize),
}

/// What [`Heap::validate`] found wrong.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapCorruption {
    #[error("block at {addr:#x} has magic {magic:#010x}")]
    BadMagic { addr: usize, magic: u32 },
    #[error("block at {addr:#x} magic disagrees with its free flag")]
    FreeFlagMismatch { addr: usize },
    #[error("block at {addr:#x} should start at {expected:#x}")]
    OutOfOrder { addr: usize, expected: usize },
    #[error("block at {addr:#x} has a broken back link")]
    BrokenLink { addr: usize },
    #[error("block at {addr:#x} runs past the extent")]
    Overrun { addr: usize },
    #[error("blocks cover {covered} of {extent} bytes")]
    SizeMismatch { covered: usize, extent: usize },
    #[error("free list entry at {addr:#x} is not a free block of its class")]
    MisfiledFreeBlock { addr: usize },
}

/// The kernel heap.
pub struct Heap<P: PageProvider> {
    pages: P,
    start: usize,
    end: usize,
    all_blocks: Link,
    free_lists: [Link; 3],
    strategy: AllocStrategy,
    last_alloc: Link,
    large: LargeTable,
    allocation_count: u64,
    free_count: u64,
    coalesce_count: u64,
}

// SAFETY: the heap exclusively owns its extent; the raw links never point
// outside it.
unsafe impl<P: PageProvider + Send> Send for Heap<P> {}

/// # Safety
/// `block` must point at a header inside a live heap extent, with no other
/// reference to that header alive.
#[inline]
unsafe fn header<'a>(block: NonNull<BlockHeader>) -> &'a mut BlockHeader {
    unsafe { &mut *block.as_ptr() }
}

impl<P: PageProvider> Heap<P> {
    /// An empty heap; every allocation fails until [`init`](Self::init).
    pub const fn new(pages: P) -> Self {
        Self {
            pages,
            start: 0,
            end: 0,
            all_blocks: None,
            free_lists: [None; 3],
            strategy: AllocStrategy::FirstFit,
            last_alloc: None,
            large: LargeTable::new(),
            allocation_count: 0,
            free_count: 0,
            coalesce_count: 0,
        }
    }

    /// Obtain the extent and format it as one free block.
    ///
    /// # Errors
    /// If already initialized, if the size is too small, or if the provider
    /// has no pages.
    pub fn init(&mut self, config: HeapConfig) -> Result<(), HeapError> {
        if self.is_initialized() {
            return Err(HeapError::AlreadyInitialized);
        }
        let pages = config.size.div_ceil(PAGE_BYTES);
        let bytes = pages * PAGE_BYTES;
        if bytes < HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(HeapError::InvalidSize(config.size));
        }
        let base = self
            .pages
            .alloc_pages(pages)
            .ok_or(HeapError::OutOfPages(pages))?;

        let block = base.cast::<BlockHeader>();
        // SAFETY: the provider handed us `bytes` writable, page-aligned bytes.
        unsafe { block.write(BlockHeader::new_free(bytes - HEADER_SIZE)) };

        self.start = base.as_ptr() as usize;
        self.end = self.start + bytes;
        self.all_blocks = Some(block);
        self.strategy = config.strategy;
        // SAFETY: fresh header, on no list yet.
        unsafe { self.push_free(block) };

        log::info!(
            "heap: {} KiB at {:#x}, {}",
            bytes / 1024,
            self.start,
            self.strategy
        );
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.start != 0
    }

    #[must_use]
    pub const fn strategy(&self) -> AllocStrategy {
        self.strategy
    }

    pub const fn set_strategy(&mut self, strategy: AllocStrategy) {
        self.strategy = strategy;
    }

    pub const fn pages(&self) -> &P {
        &self.pages
    }

    pub const fn pages_mut(&mut self) -> &mut P {
        &mut self.pages
    }

    /// Whether `ptr` lies inside the block extent.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        addr >= self.start && addr < self.end
    }

    /// Allocate `size` bytes, 8-byte aligned. `None` for zero bytes or when
    /// nothing fits.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || !self.is_initialized() {
            return None;
        }
        let size = align_size(size)?;
        if size > LARGE_BLOCK_SIZE {
            return self.alloc_large(size);
        }

        let Some(block) = self.find_block(size) else {
            log::debug!("heap: no block for {size} bytes ({})", self.strategy);
            return None;
        };
        // SAFETY: `find_block` only returns free blocks on their lists.
        unsafe {
            self.unlink_free(block);
            self.split(block, size);
            header(block).mark_allocated();
        }
        self.last_alloc = Some(block);
        self.allocation_count += 1;
        Some(BlockHeader::payload(block))
    }

    /// Allocate `n * size` zeroed bytes. `None` on overflow.
    pub fn calloc(&mut self, n: usize, size: usize) -> Option<NonNull<u8>> {
        let total = n.checked_mul(size)?;
        let ptr = self.alloc(total)?;
        // SAFETY: `alloc` returned at least `total` writable bytes.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Memory for device transfers. Plain allocations are already suitable.
    pub fn alloc_dma(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.alloc(size)
    }

    fn alloc_large(&mut self, size: usize) -> Option<NonNull<u8>> {
        if self.large.is_full() {
            log::debug!("heap: page allocation table full");
            return None;
        }
        let pages = size.div_ceil(PAGE_BYTES);
        let ptr = self.pages.alloc_pages(pages)?;
        self.large.insert(LargeAllocation {
            base: ptr.as_ptr() as usize,
            pages,
        });
        self.allocation_count += 1;
        Some(ptr)
    }

    /// Release an allocation. Pointers that are not live allocations of
    /// this heap are ignored.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        if let Some(large) = self.large.remove(addr) {
            self.pages.free_pages(ptr, large.pages);
            self.free_count += 1;
            return;
        }

        let Some(block) = self.allocated_block(addr) else {
            reject_free(addr);
            return;
        };
        // SAFETY: `allocated_block` verified the header and its links.
        unsafe {
            header(block).mark_free();
            let merged = self.coalesce(block);
            self.push_free(merged);
        }
        self.free_count += 1;
    }

    /// Resize an allocation.
    ///
    /// `None` as input allocates. A zero size frees and returns `None`. The
    /// same pointer comes back while the current block or page run is big
    /// enough; otherwise the contents move to a new allocation.
    pub fn realloc(&mut self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.alloc(new_size);
        };
        if new_size == 0 {
            self.free(ptr);
            return None;
        }

        let capacity = self.usable_size(ptr)?;
        if new_size <= capacity {
            return Some(ptr);
        }
        let new = self.alloc(new_size)?;
        // SAFETY: distinct live allocations; the old one holds `capacity` bytes.
        unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), capacity) };
        self.free(ptr);
        Some(new)
    }

    /// Bytes usable behind `ptr`, if it is a live allocation.
    #[must_use]
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        if let Some(large) = self.large.get(addr) {
            return Some(large.bytes());
        }
        let block = self.allocated_block(addr)?;
        // SAFETY: verified header.
        Some(unsafe { header(block).size })
    }

    /// Allocate `size` bytes aligned to `alignment` (a power of two).
    ///
    /// The result must be released with [`aligned_free`](Self::aligned_free),
    /// not [`free`](Self::free).
    pub fn aligned_alloc(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }
        let word = size_of::<usize>();
        let total = size.checked_add(alignment)?.checked_add(word)?;
        let raw = self.alloc(total)?;

        let raw_addr = raw.as_ptr() as usize;
        let aligned = (raw_addr + word + alignment - 1) & !(alignment - 1);
        let offset = aligned - raw_addr;
        // SAFETY: `offset + size <= total`, and the stash slot sits between
        // `raw` and `aligned`.
        unsafe {
            let aligned_ptr = raw.add(offset);
            aligned_ptr
                .cast::<usize>()
                .sub(1)
                .as_ptr()
                .write_unaligned(raw_addr);
            Some(aligned_ptr)
        }
    }

    /// Release a pointer from [`aligned_alloc`](Self::aligned_alloc).
    pub fn aligned_free(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let word = size_of::<usize>();
        let stash_in_bounds = (addr >= self.start + HEADER_SIZE + word && addr <= self.end)
            || self
                .large
                .containing(addr.wrapping_sub(word))
                .is_some_and(|l| addr.wrapping_sub(word) >= l.base);
        if !stash_in_bounds {
            reject_free(addr);
            return;
        }
        // SAFETY: the stash slot lies inside memory this heap owns.
        let raw = unsafe { ptr.cast::<usize>().sub(1).as_ptr().read_unaligned() };
        if raw > addr {
            reject_free(addr);
            return;
        }
        match NonNull::new(raw as *mut u8) {
            Some(raw) => self.free(raw),
            None => reject_free(addr),
        }
    }

    /// Verify header, flag, and back link before trusting a payload pointer.
    fn allocated_block(&self, addr: usize) -> Option<NonNull<BlockHeader>> {
        if !addr.is_multiple_of(HEAP_ALIGNMENT)
            || addr < self.start + HEADER_SIZE
            || addr >= self.end
        {
            return None;
        }
        let block = NonNull::new((addr - HEADER_SIZE) as *mut BlockHeader)?;
        // SAFETY: in bounds and aligned; every bit pattern is a valid header.
        let h = unsafe { block.as_ptr().read() };
        if h.magic != block::HEAP_MAGIC || h.is_free() {
            return None;
        }
        let linked = match h.prev_all {
            None => self.all_blocks == Some(block),
            Some(prev) => {
                self.is_header_addr(prev)
                    // SAFETY: checked to be an aligned in-extent address.
                    && unsafe { prev.as_ptr().read() }.next_all == Some(block)
            }
        };
        linked.then_some(block)
    }

    fn is_header_addr(&self, block: NonNull<BlockHeader>) -> bool {
        let addr = BlockHeader::addr(block);
        addr.is_multiple_of(HEAP_ALIGNMENT) && addr >= self.start && addr + HEADER_SIZE <= self.end
    }

    fn find_block(&self, size: usize) -> Option<NonNull<BlockHeader>> {
        let fits = |b: NonNull<BlockHeader>| {
            // SAFETY: list members are live headers.
            unsafe { Self::intact_free(b) && header(b).size >= size }
        };
        match self.strategy {
            AllocStrategy::FirstFit => SizeClass::of(size)
                .and_larger()
                .find_map(|class| self.free_list(class).find(|&b| fits(b))),
            AllocStrategy::BestFit => self
                .blocks()
                .filter(|&b| fits(b))
                // SAFETY: as above.
                .min_by_key(|&b| unsafe { header(b).size }),
            AllocStrategy::WorstFit => self
                .blocks()
                .filter(|&b| fits(b))
                // SAFETY: as above.
                .max_by_key(|&b| unsafe { header(b).size }),
            AllocStrategy::NextFit => {
                // SAFETY: `last_alloc` always names a live header.
                let resume = self
                    .last_alloc
                    .and_then(|b| unsafe { header(b).next_all })
                    .or(self.all_blocks);
                let tail = AllBlocks { cursor: resume };
                let head = self.blocks().take_while(|&b| Some(b) != resume);
                tail.chain(head).find(|&b| fits(b))
            }
        }
    }

    fn blocks(&self) -> AllBlocks {
        AllBlocks {
            cursor: self.all_blocks,
        }
    }

    fn free_list(&self, class: SizeClass) -> FreeList {
        FreeList {
            cursor: self.free_lists[class.index()],
        }
    }

    /// # Safety
    /// `block` is a free header that is on no free list.
    unsafe fn push_free(&mut self, block: NonNull<BlockHeader>) {
        let slot = {
            // SAFETY: caller contract.
            let h = unsafe { header(block) };
            SizeClass::of(h.size).index()
        };
        let old = self.free_lists[slot];
        // SAFETY: caller contract; `old` is a distinct live header.
        unsafe {
            let h = header(block);
            h.next = old;
            h.prev = None;
            if let Some(old) = old {
                header(old).prev = Some(block);
            }
        }
        self.free_lists[slot] = Some(block);
    }

    /// # Safety
    /// `block` is a header on one of the free lists.
    unsafe fn unlink_free(&mut self, block: NonNull<BlockHeader>) {
        // SAFETY: caller contract.
        let (next, prev) = unsafe {
            let h = header(block);
            (h.next, h.prev)
        };
        // SAFETY: neighbours on a free list are live headers.
        unsafe {
            match prev {
                Some(prev) => header(prev).next = next,
                None => {
                    for head in &mut self.free_lists {
                        if *head == Some(block) {
                            *head = next;
                        }
                    }
                }
            }
            if let Some(next) = next {
                header(next).prev = prev;
            }
            let h = header(block);
            h.next = None;
            h.prev = None;
        }
    }

    /// Split `block` after `size` payload bytes when the remainder can hold
    /// a header plus more than the minimum block.
    ///
    /// # Safety
    /// `block` is a live header on no free list.
    unsafe fn split(&mut self, block: NonNull<BlockHeader>, size: usize) {
        // SAFETY: caller contract.
        let h = unsafe { header(block) };
        if h.size <= size + HEADER_SIZE + MIN_BLOCK_SIZE {
            return;
        }
        let rest_size = h.size - size - HEADER_SIZE;
        // SAFETY: the remainder lies inside `block`'s payload.
        let rest = unsafe { block.cast::<u8>().add(HEADER_SIZE + size).cast::<BlockHeader>() };
        let mut rest_header = BlockHeader::new_free(rest_size);
        rest_header.prev_all = Some(block);
        rest_header.next_all = h.next_all;
        // SAFETY: `rest` is aligned and inside the extent; its successor is live.
        unsafe {
            rest.write(rest_header);
            if let Some(next) = h.next_all {
                header(next).prev_all = Some(rest);
            }
        }
        h.size = size;
        h.next_all = Some(rest);
        // SAFETY: freshly written free header.
        unsafe { self.push_free(rest) };
    }

    /// Merge a newly freed block with free, adjacent neighbours. Neighbours
    /// leave their lists first; the result is on no list.
    ///
    /// # Safety
    /// `block` is a free header on no free list.
    unsafe fn coalesce(&mut self, block: NonNull<BlockHeader>) -> NonNull<BlockHeader> {
        let mut block = block;

        // SAFETY: all-list neighbours are live headers.
        unsafe {
            if let Some(next) = header(block).next_all
                && Self::adjacent_free(block, next)
            {
                self.unlink_free(next);
                self.absorb(block, next);
            }
            if let Some(prev) = header(block).prev_all
                && Self::adjacent_free(prev, block)
            {
                self.unlink_free(prev);
                self.absorb(prev, block);
                block = prev;
            }
        }
        block
    }

    /// Both are intact free blocks and `right` starts exactly where `left` ends.
    unsafe fn adjacent_free(left: NonNull<BlockHeader>, right: NonNull<BlockHeader>) -> bool {
        // SAFETY: caller passes distinct live headers.
        unsafe {
            Self::intact_free(left)
                && Self::intact_free(right)
                && BlockHeader::addr(left) + HEADER_SIZE + header(left).size
                    == BlockHeader::addr(right)
        }
    }

    /// Free flag set and the free magic in place. A free flag under any
    /// other magic is logged and the block is left alone.
    unsafe fn intact_free(block: NonNull<BlockHeader>) -> bool {
        // SAFETY: caller passes a header address inside the extent.
        let h = unsafe { header(block) };
        if !h.is_free() {
            return false;
        }
        if h.magic != HEAP_FREE_MAGIC {
            log::error!(
                "heap: free block at {:#x} has magic {:#x}",
                BlockHeader::addr(block),
                h.magic
            );
            return false;
        }
        true
    }

    /// Fold `right` into `left`.
    unsafe fn absorb(&mut self, left: NonNull<BlockHeader>, right: NonNull<BlockHeader>) {
        // SAFETY: caller passes distinct live headers.
        unsafe {
            let r = *header(right);
            let l = header(left);
            l.size += HEADER_SIZE + r.size;
            l.next_all = r.next_all;
            if let Some(after) = r.next_all {
                header(after).prev_all = Some(left);
            }
            header(right).poison();
        }
        if self.last_alloc == Some(right) {
            self.last_alloc = Some(left);
        }
        self.coalesce_count += 1;
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut s = HeapStats {
            total_size: self.end - self.start,
            allocation_count: self.allocation_count,
            free_count: self.free_count,
            coalesce_count: self.coalesce_count,
            ..HeapStats::default()
        };
        for b in self.blocks() {
            // SAFETY: all-list members are live headers.
            let h = unsafe { header(b) };
            let class = &mut s.classes[SizeClass::of(h.size).index()];
            class.block_count += 1;
            s.header_size += HEADER_SIZE;
            if h.is_free() {
                class.free_count += 1;
                s.free_size += h.size;
                s.largest_free_block = s.largest_free_block.max(h.size);
            } else {
                class.total_allocated += h.size;
                s.used_size += h.size;
            }
        }
        for large in self.large.iter() {
            s.large_allocations += 1;
            s.large_bytes += large.bytes();
        }
        if s.free_size > 0 {
            s.fragmentation_percent = 100 - s.largest_free_block * 100 / s.free_size;
        }
        s
    }

    /// Walk every block and free list and report the first inconsistency.
    ///
    /// # Errors
    /// The [`HeapCorruption`] found.
    pub fn validate(&self) -> Result<(), HeapCorruption> {
        if !self.is_initialized() {
            return Ok(());
        }

        let mut expected = self.start;
        let mut prev: Link = None;
        let mut cursor = self.all_blocks;
        while let Some(b) = cursor {
            let addr = BlockHeader::addr(b);
            if addr != expected {
                return Err(HeapCorruption::OutOfOrder { addr, expected });
            }
            if addr + HEADER_SIZE > self.end {
                return Err(HeapCorruption::Overrun { addr });
            }
            // SAFETY: `addr` is the in-extent address the previous block ends at.
            let h = unsafe { b.as_ptr().read() };
            if h.magic != HEAP_MAGIC && h.magic != HEAP_FREE_MAGIC {
                return Err(HeapCorruption::BadMagic { addr, magic: h.magic });
            }
            if !h.is_consistent() {
                return Err(HeapCorruption::FreeFlagMismatch { addr });
            }
            if h.prev_all != prev {
                return Err(HeapCorruption::BrokenLink { addr });
            }
            if h.size > self.end - addr - HEADER_SIZE {
                return Err(HeapCorruption::Overrun { addr });
            }
            expected = addr + HEADER_SIZE + h.size;
            prev = Some(b);
            cursor = h.next_all;
        }
        if expected != self.end {
            return Err(HeapCorruption::SizeMismatch {
                covered: expected - self.start,
                extent: self.end - self.start,
            });
        }

        for class in SizeClass::ALL {
            for b in self.free_list(class) {
                let addr = BlockHeader::addr(b);
                if !self.is_header_addr(b) {
                    return Err(HeapCorruption::MisfiledFreeBlock { addr });
                }
                // SAFETY: in-extent, aligned.
                let h = unsafe { b.as_ptr().read() };
                if h.magic != HEAP_FREE_MAGIC || !h.is_free() || SizeClass::of(h.size) != class {
                    return Err(HeapCorruption::MisfiledFreeBlock { addr });
                }
            }
        }
        Ok(())
    }

    /// `true` when [`validate`](Self::validate) finds a problem.
    #[must_use]
    pub fn check_corruption(&self) -> bool {
        match self.validate() {
            Ok(()) => false,
            Err(e) => {
                log::error!("heap: {e}");
                true
            }
        }
    }

    /// Write every free list, one line per class.
    ///
    /// # Errors
    /// Whatever `out` returns.
    pub fn dump_free_lists(&self, out: &mut impl fmt::Write) -> fmt::Result {
        for class in SizeClass::ALL {
            write!(out, "{}:", class.name())?;
            for b in self.free_list(class) {
                // SAFETY: list members are live headers.
                let size = unsafe { header(b).size };
                write!(out, " [{:#x} {}]", BlockHeader::addr(b), size)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

impl<P: PageProvider> Drop for Heap<P> {
    fn drop(&mut self) {
        loop {
            let Some(l) = self.large.iter().next().copied() else {
                break;
            };
            self.large.remove(l.base);
            if let Some(ptr) = NonNull::new(l.base as *mut u8) {
                self.pages.free_pages(ptr, l.pages);
            }
        }
        if let Some(base) = NonNull::new(self.start as *mut u8) {
            let pages = (self.end - self.start) / PAGE_BYTES;
            self.pages.free_pages(base, pages);
        }
    }
}

impl<P: PageProvider> fmt::Debug for Heap<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("start", &format_args!("{:#x}", self.start))
            .field("end", &format_args!("{:#x}", self.end))
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

struct AllBlocks {
    cursor: Link,
}

impl Iterator for AllBlocks {
    type Item = NonNull<BlockHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        let b = self.cursor?;
        // SAFETY: all-list members are live headers.
        self.cursor = unsafe { header(b).next_all };
        Some(b)
    }
}

struct FreeList {
    cursor: Link,
}

impl Iterator for FreeList {
    type Item = NonNull<BlockHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        let b = self.cursor?;
        // SAFETY: free-list members are live headers.
        self.cursor = unsafe { header(b).next };
        Some(b)
    }
}

fn reject_free(addr: usize) {
    log::warn!("heap: ignoring free of {addr:#x}");
    #[cfg(feature = "strict")]
    panic!("heap: invalid free of {addr:#x}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::HostPageProvider;
    use std::string::String;
    use std::vec::Vec;

    const MIB: usize = 1024 * 1024;

    fn heap_with(strategy: AllocStrategy) -> Heap<HostPageProvider> {
        let mut heap = Heap::new(HostPageProvider::new());
        heap.init(HeapConfig {
            size: MIB,
            strategy,
        })
        .unwrap();
        heap
    }

    fn assert_balanced(heap: &Heap<HostPageProvider>) {
        let s = heap.stats();
        assert_eq!(s.used_size + s.free_size + s.header_size, s.total_size);
        assert_eq!(heap.validate(), Ok(()));
    }

    fn addr(p: NonNull<u8>) -> usize {
        p.as_ptr() as usize
    }

    #[test]
    fn init_formats_one_free_block() {
        let heap = heap_with(AllocStrategy::FirstFit);
        let s = heap.stats();
        assert_eq!(s.total_size, MIB);
        assert_eq!(s.free_size, MIB - HEADER_SIZE);
        assert_eq!(s.largest_free_block, MIB - HEADER_SIZE);
        assert_eq!(s.class(SizeClass::Large).free_count, 1);
        assert_eq!(heap.pages().pages_outstanding(), 256);
        assert_balanced(&heap);
    }

    #[test]
    fn init_twice_and_bad_sizes_fail() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        assert_eq!(heap.init(HeapConfig::default()), Err(HeapError::AlreadyInitialized));

        let mut empty = Heap::new(HostPageProvider::new());
        assert_eq!(
            empty.init(HeapConfig { size: 0, strategy: AllocStrategy::FirstFit }),
            Err(HeapError::InvalidSize(0))
        );
        let mut starved = Heap::new(HostPageProvider::with_limit(1));
        assert_eq!(starved.init(HeapConfig::default()), Err(HeapError::OutOfPages(256)));
        assert_eq!(starved.alloc(8), None);
    }

    #[test]
    fn allocations_are_distinct_and_reclaimed() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let a = heap.alloc(32).unwrap();
        let b = heap.alloc(512).unwrap();
        let c = heap.alloc(2048).unwrap();

        let mut spans = [(addr(a), 32), (addr(b), 512), (addr(c), 2048)];
        spans.sort_unstable();
        for w in spans.windows(2) {
            assert!(w[0].0 + w[0].1 <= w[1].0);
        }
        for p in [a, b, c] {
            assert_eq!(addr(p) % HEAP_ALIGNMENT, 0);
        }
        assert_balanced(&heap);

        heap.free(b);
        heap.free(a);
        heap.free(c);
        assert_balanced(&heap);

        // the whole extent is one block again
        let s = heap.stats();
        assert_eq!(s.largest_free_block, MIB - HEADER_SIZE);
        assert_eq!(s.classes.iter().map(|c| c.block_count).sum::<usize>(), 1);
        assert_eq!(s.fragmentation_percent, 0);
    }

    #[test]
    fn nearly_the_whole_extent_is_available_after_freeing_everything() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let ptrs = [heap.alloc(32).unwrap(), heap.alloc(512).unwrap(), heap.alloc(2048).unwrap()];
        for p in ptrs {
            heap.free(p);
        }

        // one block spanning the extent satisfies the largest possible request
        let whole = heap.find_block(MIB - HEADER_SIZE).unwrap();
        assert_eq!(BlockHeader::addr(whole), heap.start);

        let big = heap.alloc(MIB - 64).unwrap();
        heap.free(big);
        assert_balanced(&heap);
        assert_eq!(heap.find_block(MIB - HEADER_SIZE), Some(whole));
    }

    #[test]
    fn drop_returns_the_extent_and_every_page_run() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Counting {
            inner: HostPageProvider,
            freed: Rc<Cell<usize>>,
        }

        // SAFETY: forwards to the host provider.
        unsafe impl PageProvider for Counting {
            fn alloc_pages(&mut self, count: usize) -> Option<NonNull<u8>> {
                self.inner.alloc_pages(count)
            }

            fn free_pages(&mut self, ptr: NonNull<u8>, count: usize) {
                self.freed.set(self.freed.get() + count);
                self.inner.free_pages(ptr, count);
            }
        }

        let freed = Rc::new(Cell::new(0));
        let mut heap = Heap::new(Counting {
            inner: HostPageProvider::new(),
            freed: Rc::clone(&freed),
        });
        heap.init(HeapConfig {
            size: MIB,
            strategy: AllocStrategy::FirstFit,
        })
        .unwrap();
        heap.alloc(5000).unwrap();
        heap.alloc(10_000).unwrap();
        drop(heap);
        assert_eq!(freed.get(), 256 + 2 + 3);
    }

    #[test]
    fn zero_sized_request_fails() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        assert_eq!(heap.alloc(0), None);
    }

    #[test]
    #[cfg(not(feature = "strict"))]
    fn double_free_is_ignored() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let a = heap.alloc(40).unwrap();
        let _keep = heap.alloc(40).unwrap();
        heap.free(a);
        let before = heap.stats();
        heap.free(a);
        assert_eq!(heap.stats(), before);
        assert_balanced(&heap);
    }

    #[test]
    #[cfg(not(feature = "strict"))]
    fn foreign_and_interior_pointers_are_ignored() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let a = heap.alloc(64).unwrap();
        let before = heap.stats();

        let mut local = 0u64;
        heap.free(NonNull::from(&mut local).cast());
        // SAFETY: stays inside the 64-byte allocation.
        heap.free(unsafe { a.add(8) });
        heap.free(unsafe { a.add(3) });
        assert_eq!(heap.stats(), before);
        assert_balanced(&heap);
    }

    #[test]
    #[cfg(not(feature = "strict"))]
    fn corrupted_header_is_refused() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let a = heap.alloc(64).unwrap();
        // SAFETY: test pokes the header in front of a live allocation.
        unsafe { a.cast::<u32>().as_ptr().sub(HEADER_SIZE / 4).write(0x1234_5678) };
        heap.free(a);
        assert!(heap.check_corruption());
        assert!(matches!(heap.validate(), Err(HeapCorruption::BadMagic { magic: 0x1234_5678, .. })));
    }

    #[test]
    fn corrupted_free_neighbour_is_not_merged() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let a = heap.alloc(200).unwrap();
        let b = heap.alloc(200).unwrap();
        let _fence = heap.alloc(200).unwrap();
        heap.free(b);
        // SAFETY: test pokes the header of a free block.
        unsafe { b.cast::<u32>().as_ptr().sub(HEADER_SIZE / 4).write(0x1234_5678) };

        heap.free(a);
        assert_eq!(heap.stats().coalesce_count, 0);
        assert!(heap.check_corruption());
        assert!(matches!(heap.validate(), Err(HeapCorruption::BadMagic { magic: 0x1234_5678, .. })));

        // the damaged block is never handed out again
        let c = heap.alloc(200).unwrap();
        assert_ne!(addr(c), addr(b));
    }

    #[test]
    fn split_leaves_no_sliver() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let a = heap.alloc(64).unwrap();
        let b = heap.alloc(64).unwrap();
        let _c = heap.alloc(64).unwrap();
        heap.free(a);
        let _ = b;

        // a 64-byte hole: a 48-byte request would leave too little to split
        let d = heap.alloc(48).unwrap();
        assert_eq!(addr(d), addr(a));
        assert_eq!(heap.usable_size(d), Some(64));

        for b in heap.blocks() {
            // SAFETY: live header.
            let h = unsafe { header(b) };
            if h.is_free() {
                assert!(h.size > MIN_BLOCK_SIZE);
            }
        }
        assert_balanced(&heap);
    }

    #[test]
    fn adjacent_frees_coalesce_in_either_order() {
        for order in [[0, 1], [1, 0]] {
            let mut heap = heap_with(AllocStrategy::FirstFit);
            let blocks = [heap.alloc(200).unwrap(), heap.alloc(200).unwrap()];
            let _fence = heap.alloc(200).unwrap();

            heap.free(blocks[order[0]]);
            heap.free(blocks[order[1]]);

            let merged = 200 + HEADER_SIZE + 200;
            let list: Vec<_> = heap.free_list(SizeClass::of(merged)).collect();
            assert!(list.iter().any(|&b| BlockHeader::addr(b) + HEADER_SIZE == addr(blocks[0])
                // SAFETY: live header.
                && unsafe { header(b).size } == merged));
            assert!(heap.stats().coalesce_count >= 1);
            assert_balanced(&heap);
        }
    }

    #[test]
    fn first_fit_escalates_to_larger_classes() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let small = heap.alloc(16).unwrap();
        assert_eq!(addr(small), heap.start + HEADER_SIZE);
        assert_eq!(heap.stats().class(SizeClass::Small).total_allocated, 16);
    }

    #[test]
    fn best_fit_picks_the_tightest_hole() {
        let mut heap = heap_with(AllocStrategy::BestFit);
        let big_hole = heap.alloc(512).unwrap();
        let _f1 = heap.alloc(8).unwrap();
        let small_hole = heap.alloc(128).unwrap();
        let _f2 = heap.alloc(8).unwrap();
        heap.free(big_hole);
        heap.free(small_hole);

        assert_eq!(heap.alloc(100), Some(small_hole));
        assert_balanced(&heap);
    }

    #[test]
    fn worst_fit_picks_the_largest_block() {
        let mut heap = heap_with(AllocStrategy::WorstFit);
        let hole = heap.alloc(512).unwrap();
        let _f = heap.alloc(8).unwrap();
        heap.free(hole);
        let p = heap.alloc(100).unwrap();
        assert!(addr(p) > addr(hole));
    }

    #[test]
    fn next_fit_resumes_after_last_allocation() {
        let mut heap = heap_with(AllocStrategy::NextFit);
        let a = heap.alloc(64).unwrap();
        let _b = heap.alloc(64).unwrap();
        let c = heap.alloc(64).unwrap();
        heap.free(a);

        // the hole at `a` is behind the cursor
        let d = heap.alloc(64).unwrap();
        assert!(addr(d) > addr(c));
        assert_balanced(&heap);
    }

    #[test]
    fn next_fit_cursor_survives_coalescing() {
        let mut heap = heap_with(AllocStrategy::NextFit);
        let a = heap.alloc(64).unwrap();
        let b = heap.alloc(64).unwrap();
        heap.free(a);
        // `b` is the cursor and merges into `a`'s block
        heap.free(b);
        let c = heap.alloc(64).unwrap();
        assert!(heap.contains(c));
        assert_balanced(&heap);
    }

    #[test]
    #[cfg(not(feature = "strict"))]
    fn oversized_requests_take_whole_pages() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let before = heap.pages().pages_outstanding();
        let p = heap.alloc(3 * PAGE_BYTES + 1).unwrap();
        assert!(!heap.contains(p));
        assert_eq!(addr(p) % PAGE_BYTES, 0);
        assert_eq!(heap.pages().pages_outstanding(), before + 4);
        assert_eq!(heap.stats().large_allocations, 1);
        assert_eq!(heap.usable_size(p), Some(4 * PAGE_BYTES));

        heap.free(p);
        assert_eq!(heap.pages().pages_outstanding(), before);
        heap.free(p);
        assert_eq!(heap.pages().pages_outstanding(), before);
    }

    #[test]
    fn calloc_zeroes_and_checks_overflow() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let dirty = heap.alloc(256).unwrap();
        // SAFETY: 256 writable bytes.
        unsafe { ptr::write_bytes(dirty.as_ptr(), 0xAB, 256) };
        heap.free(dirty);

        let p = heap.calloc(32, 8).unwrap();
        // SAFETY: 256 readable bytes.
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(heap.calloc(usize::MAX, 2), None);
        assert!(heap.alloc_dma(64).is_some());
    }

    #[test]
    fn realloc_keeps_pointer_when_it_fits_and_moves_otherwise() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let p = heap.realloc(None, 100).unwrap();
        // SAFETY: 100 writable bytes.
        unsafe { ptr::copy_nonoverlapping(b"kernel".as_ptr(), p.as_ptr(), 6) };

        assert_eq!(heap.realloc(Some(p), 50), Some(p));
        assert_eq!(heap.realloc(Some(p), 104), Some(p));

        let _fence = heap.alloc(8).unwrap();
        let q = heap.realloc(Some(p), 600).unwrap();
        assert_ne!(q, p);
        // SAFETY: at least 6 readable bytes.
        let moved = unsafe { core::slice::from_raw_parts(q.as_ptr(), 6) };
        assert_eq!(moved, b"kernel");
        assert_eq!(heap.usable_size(p), None);

        let big = heap.realloc(Some(q), 10_000).unwrap();
        assert!(!heap.contains(big));
        assert_eq!(heap.realloc(Some(big), 12_000), Some(big));
        assert_eq!(heap.realloc(Some(big), 0), None);
        assert_eq!(heap.stats().large_allocations, 0);
        assert_balanced(&heap);
    }

    #[test]
    fn aligned_allocations_round_trip() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        for align in [16, 64, 256, 4096] {
            let p = heap.aligned_alloc(100, align).unwrap();
            assert_eq!(addr(p) % align, 0);
            heap.aligned_free(p);
        }
        assert_eq!(heap.aligned_alloc(100, 24), None);
        assert_eq!(heap.aligned_alloc(0, 16), None);
        assert_eq!(heap.stats().large_allocations, 0);
        assert_eq!(heap.stats().used_size, 0);
        assert_balanced(&heap);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut heap = Heap::new(HostPageProvider::new());
        heap.init(HeapConfig { size: PAGE_BYTES, strategy: AllocStrategy::FirstFit })
            .unwrap();
        let mut live = Vec::new();
        while let Some(p) = heap.alloc(1024) {
            live.push(p);
        }
        assert!(!live.is_empty());
        assert_eq!(heap.alloc(1024), None);
        assert_balanced(&heap);
    }

    #[test]
    fn page_table_full_fails_cleanly() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let mut live = Vec::new();
        for _ in 0..crate::large::MAX_LARGE_ALLOCATIONS {
            live.push(heap.alloc(PAGE_BYTES + 8).unwrap());
        }
        let outstanding = heap.pages().pages_outstanding();
        assert_eq!(heap.alloc(PAGE_BYTES + 8), None);
        assert_eq!(heap.pages().pages_outstanding(), outstanding);
        for p in live {
            heap.free(p);
        }
    }

    #[test]
    fn reports_and_listings() {
        let mut heap = heap_with(AllocStrategy::FirstFit);
        let a = heap.alloc(32).unwrap();
        let _b = heap.alloc(32).unwrap();
        heap.free(a);

        let mut out = String::new();
        heap.dump_free_lists(&mut out).unwrap();
        let mut lines = out.lines();
        assert!(lines.next().unwrap().starts_with("small: [0x"));
        assert!(lines.next().unwrap().eq("medium:"));
        assert!(lines.next().unwrap().starts_with("large: [0x"));

        let mut stats = String::new();
        core::fmt::write(&mut stats, format_args!("{}", heap.stats())).unwrap();
        assert!(stats.contains("Total size:   1024 KiB"));
        assert!(stats.contains("Allocations:  2  Frees: 1"));
    }
}
