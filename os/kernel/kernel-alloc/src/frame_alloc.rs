//! # Bitmap Physical Frame Allocator
//!
//! One bit per 4 KiB frame over `[memory_start, memory_end)`; a set bit means
//! allocated or reserved. The bitmap is a fixed array, so the allocator needs
//! no heap and works before paging is on.
//!
//! Initialization marks the whole range used and then releases only what is
//! known to be usable, so anything never released stays unavailable.
//!
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapFrameAlloc, PmmConfig};
//!
//! let mut pmm = BitmapFrameAlloc::new();
//! pmm.init(PmmConfig::default()).unwrap();
//! let frame = pmm.alloc_frame().unwrap();
//! assert!(pmm.is_frame_used(frame));
//! pmm.free_frame(frame);
//! assert_eq!(pmm.used_frames() + pmm.free_frames(), pmm.total_frames());
//! ```

use core::fmt;
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::{
    KERNEL_IMAGE_END, KERNEL_IMAGE_START, PAGE_SIZE, PHYS_MEMORY_END, PHYS_MEMORY_START,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::FrameAlloc;

/// Largest number of frames the bitmap can track (128 MiB of RAM).
pub const MAX_TRACKED_FRAMES: u32 = 32 * 1024;

/// Bitmap storage in bytes.
pub const BITMAP_BYTES: usize = (MAX_TRACKED_FRAMES / 8) as usize;

const FRAME_SHIFT: u32 = 12;

/// Physical range and kernel image location.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PmmConfig {
    pub memory_start: PhysicalAddress,
    pub memory_end: PhysicalAddress,
    pub kernel_start: PhysicalAddress,
    pub kernel_end: PhysicalAddress,
}

impl Default for PmmConfig {
    fn default() -> Self {
        Self {
            memory_start: PHYS_MEMORY_START,
            memory_end: PHYS_MEMORY_END,
            kernel_start: KERNEL_IMAGE_START,
            kernel_end: KERNEL_IMAGE_END,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("physical range {start:?}..{end:?} is empty or unaligned")]
    InvalidRange {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    #[error("{0} frames exceed the bitmap capacity")]
    RangeTooLarge(u32),
}

/// Snapshot of the allocator counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PmmStats {
    pub memory_start: u32,
    pub memory_end: u32,
    pub total_frames: u32,
    pub used_frames: u32,
    pub free_frames: u32,
}

impl PmmStats {
    #[must_use]
    pub const fn free_memory(&self) -> u32 {
        self.free_frames << FRAME_SHIFT
    }
}

impl fmt::Display for PmmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Physical memory: {:#010x} - {:#010x}",
            self.memory_start, self.memory_end
        )?;
        writeln!(
            f,
            "  Total frames: {} ({} KiB)",
            self.total_frames,
            (self.total_frames << FRAME_SHIFT) / 1024
        )?;
        writeln!(
            f,
            "  Used frames:  {} ({} KiB)",
            self.used_frames,
            (self.used_frames << FRAME_SHIFT) / 1024
        )?;
        writeln!(
            f,
            "  Free frames:  {} ({} KiB)",
            self.free_frames,
            self.free_memory() / 1024
        )
    }
}

/// Bitmap-tracked frame allocator.
pub struct BitmapFrameAlloc {
    bitmap: [u8; BITMAP_BYTES],
    memory_start: u32,
    memory_end: u32,
    total_frames: u32,
    used_frames: u32,
}

impl Default for BitmapFrameAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapFrameAlloc {
    /// An allocator that tracks nothing yet; every request fails until
    /// [`init`](Self::init) runs.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bitmap: [0xFF; BITMAP_BYTES],
            memory_start: 0,
            memory_end: 0,
            total_frames: 0,
            used_frames: 0,
        }
    }

    /// Track `config`'s range and release all of it except the kernel image.
    ///
    /// # Errors
    /// If the range is empty, unaligned, or too large for the bitmap.
    pub fn init(&mut self, config: PmmConfig) -> Result<(), FrameAllocError> {
        self.reset(config)?;
        self.release_range(config.memory_start.as_u32(), config.kernel_start.as_u32());
        self.release_range(config.kernel_end.as_u32(), config.memory_end.as_u32());
        log::info!(
            "PMM: {} frames tracked, {} free",
            self.total_frames,
            self.free_frames()
        );
        Ok(())
    }

    /// Track `config`'s range and release only the `Available` regions of a
    /// boot memory map. The kernel image stays reserved.
    ///
    /// # Errors
    /// As for [`init`](Self::init).
    pub fn init_from_memory_map(
        &mut self,
        config: PmmConfig,
        regions: &[MemoryRegion],
    ) -> Result<(), FrameAllocError> {
        self.reset(config)?;
        for region in regions.iter().filter(|r| r.is_available()) {
            let end = u32::try_from(region.end()).unwrap_or(u32::MAX);
            self.release_range(region.base.as_u32(), end);
        }
        self.reserve_range(config.kernel_start.as_u32(), config.kernel_end.as_u32());
        log::info!(
            "PMM: {} frames tracked, {} free from {} map entries",
            self.total_frames,
            self.free_frames(),
            regions.len()
        );
        Ok(())
    }

    fn reset(&mut self, config: PmmConfig) -> Result<(), FrameAllocError> {
        let (start, end) = (config.memory_start, config.memory_end);
        if start >= end || !start.is_aligned::<Size4K>() || !end.is_aligned::<Size4K>() {
            return Err(FrameAllocError::InvalidRange { start, end });
        }
        let frames = (end.as_u32() - start.as_u32()) >> FRAME_SHIFT;
        if frames > MAX_TRACKED_FRAMES {
            return Err(FrameAllocError::RangeTooLarge(frames));
        }

        self.bitmap.fill(0xFF);
        self.memory_start = start.as_u32();
        self.memory_end = end.as_u32();
        self.total_frames = frames;
        self.used_frames = frames;
        Ok(())
    }

    /// Mark the whole frames inside `[base, base + len)` free.
    pub fn release_region(&mut self, base: PhysicalAddress, len: u32) {
        let end = base.as_u32().saturating_add(len);
        self.release_range(base.as_u32(), end);
    }

    /// Mark every frame touched by `[base, base + len)` used.
    pub fn reserve_region(&mut self, base: PhysicalAddress, len: u32) {
        let end = base.as_u32().saturating_add(len);
        self.reserve_range(base.as_u32(), end);
    }

    fn release_range(&mut self, start: u32, end: u32) {
        let start = align_up(start.max(self.memory_start));
        let end = align_down(end.min(self.memory_end));
        let mut addr = start;
        while addr < end {
            if let Some(i) = self.frame_index(addr) {
                self.clear_bit(i);
            }
            addr += PAGE_SIZE;
        }
    }

    fn reserve_range(&mut self, start: u32, end: u32) {
        let start = align_down(start.max(self.memory_start));
        let end = align_up(end.min(self.memory_end));
        let mut addr = start;
        while addr < end {
            if let Some(i) = self.frame_index(addr) {
                self.set_bit(i);
            }
            addr += PAGE_SIZE;
        }
    }

    /// Allocate one frame: the lowest free one.
    pub fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
        let Some(index) = self.first_free() else {
            log::debug!("PMM: out of frames");
            return None;
        };
        self.set_bit(index);
        Some(self.frame_address(index))
    }

    /// Allocate `n` physically consecutive frames, first fit by address.
    pub fn alloc_contiguous(&mut self, n: u32) -> Option<PhysicalAddress> {
        match n {
            0 => return None,
            1 => return self.alloc_frame(),
            _ => {}
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for index in 0..self.total_frames {
            if self.test_bit(index) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = index;
            }
            run_len += 1;
            if run_len == n {
                for i in run_start..run_start + n {
                    self.set_bit(i);
                }
                return Some(self.frame_address(run_start));
            }
        }

        log::debug!("PMM: no run of {n} free frames");
        None
    }

    /// Return a frame. Out-of-range addresses and frames that are already
    /// free are ignored.
    pub fn free_frame(&mut self, addr: PhysicalAddress) {
        let addr = align_down(addr.as_u32());
        let Some(index) = self.frame_index(addr) else {
            reject_free(addr, "outside the tracked range");
            return;
        };
        if !self.test_bit(index) {
            reject_free(addr, "already free");
            return;
        }
        self.clear_bit(index);
    }

    /// Return `n` frames starting at `addr`.
    pub fn free_contiguous(&mut self, addr: PhysicalAddress, n: u32) {
        let base = align_down(addr.as_u32());
        for i in 0..n {
            let Some(frame) = base.checked_add(i << FRAME_SHIFT) else {
                break;
            };
            self.free_frame(PhysicalAddress::new(frame));
        }
    }

    /// Whether the frame containing `addr` is allocated or reserved. Addresses
    /// outside the tracked range count as used.
    #[must_use]
    pub fn is_frame_used(&self, addr: PhysicalAddress) -> bool {
        self.frame_index(align_down(addr.as_u32()))
            .is_none_or(|i| self.test_bit(i))
    }

    #[must_use]
    pub const fn total_frames(&self) -> u32 {
        self.total_frames
    }

    #[must_use]
    pub const fn used_frames(&self) -> u32 {
        self.used_frames
    }

    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.total_frames - self.used_frames
    }

    /// Tracked bytes.
    #[must_use]
    pub const fn total_memory(&self) -> u32 {
        self.total_frames << FRAME_SHIFT
    }

    #[must_use]
    pub const fn used_memory(&self) -> u32 {
        self.used_frames << FRAME_SHIFT
    }

    #[must_use]
    pub const fn free_memory(&self) -> u32 {
        self.free_frames() << FRAME_SHIFT
    }

    /// End of the tracked physical range.
    #[must_use]
    pub const fn memory_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.memory_end)
    }

    #[must_use]
    pub const fn stats(&self) -> PmmStats {
        PmmStats {
            memory_start: self.memory_start,
            memory_end: self.memory_end,
            total_frames: self.total_frames,
            used_frames: self.used_frames,
            free_frames: self.free_frames(),
        }
    }

    fn frame_index(&self, addr: u32) -> Option<u32> {
        if addr < self.memory_start || addr >= self.memory_end {
            return None;
        }
        Some((addr - self.memory_start) >> FRAME_SHIFT)
    }

    const fn frame_address(&self, index: u32) -> PhysicalAddress {
        PhysicalAddress::new(self.memory_start + (index << FRAME_SHIFT))
    }

    const fn test_bit(&self, index: u32) -> bool {
        self.bitmap[(index / 8) as usize] & (1 << (index % 8)) != 0
    }

    fn set_bit(&mut self, index: u32) {
        if !self.test_bit(index) {
            self.bitmap[(index / 8) as usize] |= 1 << (index % 8);
            self.used_frames += 1;
        }
    }

    fn clear_bit(&mut self, index: u32) {
        if self.test_bit(index) {
            self.bitmap[(index / 8) as usize] &= !(1 << (index % 8));
            self.used_frames -= 1;
        }
    }

    fn first_free(&self) -> Option<u32> {
        let bytes = self.total_frames.div_ceil(8) as usize;
        for (byte_index, &byte) in (0u32..).zip(&self.bitmap[..bytes]) {
            if byte == 0xFF {
                continue;
            }
            let index = byte_index * 8 + byte.trailing_ones();
            if index < self.total_frames {
                return Some(index);
            }
        }
        None
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_frame().map(PhysicalAddress::page)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        self.free_frame(page.base());
    }
}

impl fmt::Debug for BitmapFrameAlloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapFrameAlloc")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[inline]
const fn align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}

#[inline]
const fn align_up(addr: u32) -> u32 {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(v) => v & !(PAGE_SIZE - 1),
        None => align_down(addr),
    }
}

fn reject_free(addr: u32, why: &str) {
    log::warn!("PMM: ignoring free of {addr:#010x}: {why}");
    #[cfg(feature = "strict")]
    panic!("PMM: invalid free of {addr:#010x}: {why}");
}
