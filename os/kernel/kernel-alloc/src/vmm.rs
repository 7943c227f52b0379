//! # Virtual Memory Manager
//!
//! Owns the frame allocator and builds page directories on top of it.
//!
//! - One privileged kernel directory, created by [`Vmm::init`]. It identity
//!   maps the first 4 MiB and maps physical memory again at `0xC000_0000`.
//! - User directories start from a by-value copy of the kernel half.
//! - `[0xD000_0000, 0xE000_0000)` is the kernel heap window, handed out in
//!   whole pages by a cursor that only moves up.
//!
//! Every change to a mapping flushes the single TLB entry it affects.
//!
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapFrameAlloc, PmmConfig};
//! use kernel_alloc::vmm::Vmm;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! use kernel_registers::HostedPlatform;
//! use kernel_vmem::{ArenaPhysMapper, PageEntryBits};
//!
//! let mapper = ArenaPhysMapper::new(16 * 1024 * 1024);
//! let platform = HostedPlatform::new();
//! let mut pmm = BitmapFrameAlloc::new();
//! pmm.init(PmmConfig::default()).unwrap();
//!
//! let mut vmm = Vmm::new(&mapper, &platform, pmm);
//! let dir = vmm.init().unwrap();
//! let va = VirtualAddress::new(0x0080_0000);
//! vmm.map_page(dir, va, PhysicalAddress::new(0x0030_0000), PageEntryBits::kernel_rw()).unwrap();
//! assert_eq!(vmm.translate(dir, va + 0x10), Some(PhysicalAddress::new(0x0030_0010)));
//! ```

use crate::frame_alloc::BitmapFrameAlloc;
use crate::pages::PageProvider;
use core::fmt;
use core::ptr::NonNull;
use kernel_info::memory::{
    IDENTITY_MAP_BYTES, KERNEL_HEAP_END, KERNEL_HEAP_START, KERNEL_VIRTUAL_BASE, PAGE_SIZE,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_registers::Platform;
use kernel_vmem::{
    AddressSpace, AddressSpaceError, FrameAlloc, MemoryType, PageEntryBits, PhysMapper,
    TableAllocation,
};

/// A page directory, named by its frame.
pub type Directory = PhysicalPage<Size4K>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error("virtual memory manager is not initialized")]
    NotInitialized,
    #[error("virtual memory manager is already initialized")]
    AlreadyInitialized,
    #[error("out of physical frames")]
    OutOfFrames,
    #[error("{0:?} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("operation not permitted on this directory or range")]
    ProtectionViolation,
    #[error("invalid range")]
    InvalidRange,
    #[error("kernel heap window exhausted")]
    HeapWindowExhausted,
}

impl From<AddressSpaceError> for VmmError {
    fn from(value: AddressSpaceError) -> Self {
        match value {
            AddressSpaceError::OutOfFrames => Self::OutOfFrames,
            AddressSpaceError::MissingTable(va) | AddressSpaceError::NotMapped(va) => {
                Self::NotMapped(va)
            }
        }
    }
}

/// Mapping counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct VmmStats {
    pub pages_mapped: u32,
    pub page_tables_allocated: u32,
    pub heap_cursor: VirtualAddress,
    pub kernel_directory: Option<PhysicalAddress>,
    pub paging_enabled: bool,
}

impl fmt::Display for VmmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Virtual memory:")?;
        match self.kernel_directory {
            Some(dir) => writeln!(f, "  Kernel directory: {dir}")?,
            None => writeln!(f, "  Kernel directory: none")?,
        }
        writeln!(
            f,
            "  Paging: {}",
            if self.paging_enabled { "enabled" } else { "disabled" }
        )?;
        writeln!(f, "  Pages mapped: {}", self.pages_mapped)?;
        writeln!(f, "  Page tables:  {}", self.page_tables_allocated)?;
        writeln!(f, "  Heap cursor:  {}", self.heap_cursor)
    }
}

/// Virtual memory manager.
pub struct Vmm<'m, M: PhysMapper, P: Platform, A: FrameAlloc = BitmapFrameAlloc> {
    mapper: &'m M,
    platform: &'m P,
    frames: A,
    kernel_directory: Option<Directory>,
    current_directory: Option<Directory>,
    heap_cursor: u32,
    pages_mapped: u32,
    page_tables_allocated: u32,
}

impl<'m, M: PhysMapper, P: Platform, A: FrameAlloc> Vmm<'m, M, P, A> {
    pub const fn new(mapper: &'m M, platform: &'m P, frames: A) -> Self {
        Self {
            mapper,
            platform,
            frames,
            kernel_directory: None,
            current_directory: None,
            heap_cursor: KERNEL_HEAP_START.as_u32(),
            pages_mapped: 0,
            page_tables_allocated: 0,
        }
    }

    pub const fn frames(&self) -> &A {
        &self.frames
    }

    pub const fn frames_mut(&mut self) -> &mut A {
        &mut self.frames
    }

    pub const fn platform(&self) -> &'m P {
        self.platform
    }

    fn space(&self, dir: Directory) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, dir)
    }

    /// Build the kernel directory for physical memory `[0, phys_end)`,
    /// load it, and enable paging. Paging is the last step.
    ///
    /// The identity map covers the first 4 MiB; the higher-half map covers
    /// `max(4 MiB, phys_end)` so every page-table frame stays reachable.
    ///
    /// # Errors
    /// [`VmmError::AlreadyInitialized`] on a second call, or any mapping error.
    pub fn init_with_memory_end(&mut self, phys_end: PhysicalAddress) -> Result<Directory, VmmError> {
        if self.kernel_directory.is_some() || self.platform.paging_enabled() {
            return Err(VmmError::AlreadyInitialized);
        }
        let direct_bytes = phys_end.as_u32().max(IDENTITY_MAP_BYTES);
        if KERNEL_VIRTUAL_BASE
            .as_u32()
            .checked_add(direct_bytes)
            .is_none_or(|end| end > KERNEL_HEAP_START.as_u32())
        {
            return Err(VmmError::InvalidRange);
        }

        let dir = self.create_directory()?;
        let flags = PageEntryBits::kernel_rw();
        let mut offset = 0;
        while offset < direct_bytes {
            let pa = PhysicalAddress::new(offset);
            if offset < IDENTITY_MAP_BYTES {
                self.install(dir, VirtualAddress::new(offset), pa, flags)?;
            }
            self.install(dir, KERNEL_VIRTUAL_BASE + offset, pa, flags)?;
            offset += PAGE_SIZE;
        }
        self.reserve_heap_tables(dir)?;

        self.kernel_directory = Some(dir);
        // SAFETY: `dir` identity maps the low 4 MiB the kernel runs from.
        unsafe {
            self.switch_directory(dir);
            self.platform.enable_paging();
        }
        self.mapper.on_paging_enabled();
        log::info!(
            "VMM: paging enabled, directory {dir}, {} pages in {} tables",
            self.pages_mapped,
            self.page_tables_allocated
        );
        Ok(dir)
    }

    /// [`init_with_memory_end`](Self::init_with_memory_end) for the first 4 MiB.
    ///
    /// # Errors
    /// As above.
    pub fn init(&mut self) -> Result<Directory, VmmError> {
        self.init_with_memory_end(PhysicalAddress::new(IDENTITY_MAP_BYTES))
    }

    /// Create the page tables of the heap window up front, so directories
    /// copied from the kernel template later see every heap mapping.
    fn reserve_heap_tables(&mut self, dir: Directory) -> Result<(), VmmError> {
        let span = 1u32 << 22;
        let mut va = KERNEL_HEAP_START.as_u32();
        while va < KERNEL_HEAP_END.as_u32() {
            let space = self.space(dir);
            let probe = VirtualAddress::new(va);
            // install and clear a leaf just to force the table into existence
            let outcome = space.map_one(&mut self.frames, probe, PhysicalAddress::zero(), PageEntryBits::kernel_rw())?;
            space.unmap_one(probe)?;
            if outcome == TableAllocation::Allocated {
                self.page_tables_allocated += 1;
            }
            va += span;
        }
        Ok(())
    }

    /// Map without a TLB flush; for directories that are not active yet.
    fn install(
        &mut self,
        dir: Directory,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        let space = self.space(dir);
        let was_mapped = space.entry(va).is_some();
        if space.map_one(&mut self.frames, va, pa, flags)? == TableAllocation::Allocated {
            self.page_tables_allocated += 1;
        }
        if !was_mapped {
            self.pages_mapped += 1;
        }
        Ok(())
    }

    /// A zeroed directory.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`].
    pub fn create_directory(&mut self) -> Result<Directory, VmmError> {
        let space = AddressSpace::create(self.mapper, &mut self.frames)?;
        Ok(space.root_page())
    }

    /// Load `dir` into CR3.
    ///
    /// # Safety
    /// With paging on, `dir` must map the executing code and stack.
    pub unsafe fn switch_directory(&mut self, dir: Directory) {
        // SAFETY: forwarded to the caller.
        unsafe { self.platform.load_page_directory(dir) };
        self.current_directory = Some(dir);
    }

    pub const fn kernel_directory(&self) -> Option<Directory> {
        self.kernel_directory
    }

    pub const fn current_directory(&self) -> Option<Directory> {
        self.current_directory
    }

    /// Map the page containing `va` to the frame containing `pa`.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`] when a page table cannot be allocated.
    pub fn map_page(
        &mut self,
        dir: Directory,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        self.install(dir, va, pa, flags)?;
        self.platform.flush_tlb_entry(va.page::<Size4K>().base());
        Ok(())
    }

    /// Clear the mapping of `va` and free its frame.
    ///
    /// # Errors
    /// [`VmmError::NotMapped`] when nothing is mapped there.
    pub fn unmap_page(&mut self, dir: Directory, va: VirtualAddress) -> Result<(), VmmError> {
        let frame = self.space(dir).unmap_one(va)?;
        self.frames.free_4k(frame);
        self.pages_mapped = self.pages_mapped.saturating_sub(1);
        self.platform.flush_tlb_entry(va.page::<Size4K>().base());
        Ok(())
    }

    #[must_use]
    pub fn translate(&self, dir: Directory, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space(dir).query(va)
    }

    /// Replace the flags of an existing mapping.
    ///
    /// # Errors
    /// [`VmmError::NotMapped`].
    pub fn protect_page(
        &mut self,
        dir: Directory,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        self.space(dir).protect(va, flags)?;
        self.platform.flush_tlb_entry(va.page::<Size4K>().base());
        Ok(())
    }

    /// Whether an access of the given kind at `va` is allowed in `dir`.
    #[must_use]
    pub fn is_address_valid(
        &self,
        dir: Directory,
        va: VirtualAddress,
        write_access: bool,
        user_mode: bool,
    ) -> bool {
        self.space(dir).is_accessible(va, write_access, user_mode)
    }

    /// Back `[va, va + size)` with fresh frames. On failure every page mapped
    /// by this call is unmapped and freed again.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`] or [`VmmError::InvalidRange`].
    pub fn map_region(
        &mut self,
        dir: Directory,
        va: VirtualAddress,
        size: u32,
        kind: MemoryType,
    ) -> Result<(), VmmError> {
        let (page, offset) = va.split::<Size4K>();
        let base = page.base();
        // every page the span touches, so an unaligned `va` still covers its tail
        let span = u64::from(offset.as_u32()) + u64::from(size);
        if size == 0 || u64::from(base.as_u32()) + span > 1 << 32 {
            return Err(VmmError::InvalidRange);
        }
        let pages =
            u32::try_from(span.div_ceil(u64::from(PAGE_SIZE))).map_err(|_| VmmError::InvalidRange)?;

        for i in 0..pages {
            let page_va = base + i * PAGE_SIZE;
            let result = match self.frames.alloc_4k() {
                Some(frame) => self
                    .map_page(dir, page_va, frame.base(), kind.leaf_flags())
                    .inspect_err(|_| self.frames.free_4k(frame)),
                None => Err(VmmError::OutOfFrames),
            };
            if let Err(e) = result {
                log::debug!("VMM: map_region {base} failed at page {i}: {e}");
                self.rollback(dir, base, i);
                return Err(e);
            }
        }
        Ok(())
    }

    fn rollback(&mut self, dir: Directory, base: VirtualAddress, pages: u32) {
        for i in 0..pages {
            if let Err(e) = self.unmap_page(dir, base + i * PAGE_SIZE) {
                log::warn!("VMM: rollback of {base} page {i}: {e}");
            }
        }
    }

    /// Hand out `count` fresh kernel pages from the heap window.
    pub fn alloc_pages(&mut self, count: u32) -> Option<VirtualAddress> {
        match self.try_alloc_pages(count) {
            Ok(va) => Some(va),
            Err(e) => {
                log::debug!("VMM: alloc_pages({count}) failed: {e}");
                None
            }
        }
    }

    fn try_alloc_pages(&mut self, count: u32) -> Result<VirtualAddress, VmmError> {
        let dir = self.kernel_directory.ok_or(VmmError::NotInitialized)?;
        if count == 0 {
            return Err(VmmError::InvalidRange);
        }
        let bytes = count
            .checked_mul(PAGE_SIZE)
            .ok_or(VmmError::HeapWindowExhausted)?;
        let end = self
            .heap_cursor
            .checked_add(bytes)
            .ok_or(VmmError::HeapWindowExhausted)?;
        if end > KERNEL_HEAP_END.as_u32() {
            return Err(VmmError::HeapWindowExhausted);
        }

        let va = VirtualAddress::new(self.heap_cursor);
        self.map_region(dir, va, bytes, MemoryType::KernelHeap)?;
        self.heap_cursor = end;
        Ok(va)
    }

    /// Unmap `count` pages at `va` and free their frames. The heap window
    /// cursor does not move back.
    pub fn free_pages(&mut self, va: VirtualAddress, count: u32) {
        let Some(dir) = self.kernel_directory else {
            return;
        };
        for i in 0..count {
            let Some(page) = va.checked_add(i * PAGE_SIZE) else {
                break;
            };
            if let Err(e) = self.unmap_page(dir, page) {
                log::warn!("VMM: free_pages {page}: {e}");
            }
        }
    }

    /// A new directory sharing the kernel half of the kernel directory.
    ///
    /// # Errors
    /// [`VmmError::NotInitialized`] or [`VmmError::OutOfFrames`].
    pub fn create_user_directory(&mut self) -> Result<Directory, VmmError> {
        let kernel = self.kernel_directory.ok_or(VmmError::NotInitialized)?;
        let dir = self.create_directory()?;
        self.space(dir).copy_kernel_entries_from(&self.space(kernel));
        log::debug!("VMM: user directory {dir}");
        Ok(dir)
    }

    /// Free every user mapping, page table, and the directory itself.
    ///
    /// # Errors
    /// [`VmmError::ProtectionViolation`] for the kernel directory or the
    /// active one.
    pub fn destroy_user_directory(&mut self, dir: Directory) -> Result<(), VmmError> {
        if Some(dir) == self.kernel_directory || Some(dir) == self.current_directory {
            log::warn!("VMM: refusing to destroy directory {dir}");
            return Err(VmmError::ProtectionViolation);
        }
        let space = self.space(dir);
        let tables = u32::try_from(space.user_table_count()).unwrap_or(u32::MAX);
        let leaves = u32::try_from(space.release_user_half(&mut self.frames)).unwrap_or(u32::MAX);
        self.pages_mapped = self.pages_mapped.saturating_sub(leaves);
        self.page_tables_allocated = self.page_tables_allocated.saturating_sub(tables);
        self.frames.free_4k(dir);
        Ok(())
    }

    /// Map a user stack `[top - size, top)`.
    ///
    /// # Errors
    /// [`VmmError::InvalidRange`] for a stack that wraps or reaches into the
    /// kernel half; otherwise as [`map_region`](Self::map_region).
    pub fn setup_user_stack(
        &mut self,
        dir: Directory,
        top: VirtualAddress,
        size: u32,
    ) -> Result<VirtualAddress, VmmError> {
        if top > KERNEL_VIRTUAL_BASE || size > top.as_u32() {
            return Err(VmmError::InvalidRange);
        }
        let bottom = VirtualAddress::new(top.as_u32() - size);
        self.map_region(dir, bottom, size, MemoryType::UserStack)?;
        Ok(bottom)
    }

    /// Map a user heap `[start, start + size)`.
    ///
    /// # Errors
    /// [`VmmError::InvalidRange`] for a heap that reaches into the kernel
    /// half; otherwise as [`map_region`](Self::map_region).
    pub fn setup_user_heap(
        &mut self,
        dir: Directory,
        start: VirtualAddress,
        size: u32,
    ) -> Result<(), VmmError> {
        if start
            .checked_add(size)
            .is_none_or(|end| end > KERNEL_VIRTUAL_BASE)
        {
            return Err(VmmError::InvalidRange);
        }
        self.map_region(dir, start, size, MemoryType::UserHeap)
    }

    #[must_use]
    pub fn stats(&self) -> VmmStats {
        VmmStats {
            pages_mapped: self.pages_mapped,
            page_tables_allocated: self.page_tables_allocated,
            heap_cursor: VirtualAddress::new(self.heap_cursor),
            kernel_directory: self.kernel_directory.map(PhysicalPage::base),
            paging_enabled: self.platform.paging_enabled(),
        }
    }
}

// SAFETY: pages come from the kernel heap window of the active kernel
// directory, mapped writable, and are unmapped only through `free_pages`.
unsafe impl<M: PhysMapper, P: Platform, A: FrameAlloc> PageProvider for Vmm<'_, M, P, A> {
    fn alloc_pages(&mut self, count: usize) -> Option<NonNull<u8>> {
        let count = u32::try_from(count).ok()?;
        let va = Self::alloc_pages(self, count)?;
        NonNull::new(va.as_usize() as *mut u8)
    }

    fn free_pages(&mut self, ptr: NonNull<u8>, count: usize) {
        let (Ok(addr), Ok(count)) = (u32::try_from(ptr.as_ptr() as usize), u32::try_from(count))
        else {
            log::warn!("VMM: ignoring page free of {ptr:p}");
            return;
        };
        Self::free_pages(self, VirtualAddress::new(addr), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_alloc::PmmConfig;
    use kernel_info::memory::{USER_STACK_SIZE, USER_STACK_TOP};
    use kernel_registers::HostedPlatform;
    use kernel_vmem::ArenaPhysMapper;

    const MIB: u32 = 1024 * 1024;

    fn pa(v: u32) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn va(v: u32) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pmm() -> BitmapFrameAlloc {
        let mut pmm = BitmapFrameAlloc::new();
        pmm.init(PmmConfig::default()).unwrap();
        pmm
    }

    fn setup() -> (ArenaPhysMapper, HostedPlatform) {
        (ArenaPhysMapper::new(16 * MIB), HostedPlatform::new())
    }

    #[test]
    fn init_maps_identity_and_higher_half_then_enables_paging() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        let dir = vmm.init_with_memory_end(pa(16 * MIB)).unwrap();

        assert!(platform.paging_enabled());
        assert_eq!(platform.page_directory(), dir);
        assert_eq!(vmm.current_directory(), Some(dir));
        assert_eq!(vmm.translate(dir, va(0x0010_0123)), Some(pa(0x0010_0123)));
        assert_eq!(vmm.translate(dir, va(0xC0F0_0000)), Some(pa(0x00F0_0000)));
        assert_eq!(vmm.translate(dir, va(0x0040_0000)), None);
        assert!(vmm.is_address_valid(dir, va(0xC000_0000), true, false));
        assert!(!vmm.is_address_valid(dir, va(0xC000_0000), false, true));

        let stats = vmm.stats();
        assert_eq!(stats.pages_mapped, 1024 + 4096);
        // one identity table, four higher-half tables, 64 heap-window tables
        assert_eq!(stats.page_tables_allocated, 1 + 4 + 64);
        assert_eq!(vmm.init(), Err(VmmError::AlreadyInitialized));
    }

    #[test]
    fn higher_half_must_fit_below_the_heap_window() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        assert_eq!(
            vmm.init_with_memory_end(pa(0x2000_0000)),
            Err(VmmError::InvalidRange)
        );
    }

    #[test]
    fn map_translate_unmap_round_trip_flushes_each_time() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        let dir = vmm.init().unwrap();

        let frame = vmm.frames_mut().alloc_frame().unwrap();
        let flushes = platform.tlb_flushes().len();
        vmm.map_page(dir, va(0x0080_0ABC), frame, PageEntryBits::kernel_rw())
            .unwrap();
        assert_eq!(vmm.translate(dir, va(0x0080_0123)), Some(frame + 0x123));
        assert_eq!(platform.tlb_flushes().len(), flushes + 1);
        assert_eq!(platform.tlb_flushes().last(), Some(&va(0x0080_0000)));

        let free = vmm.frames().free_frames();
        vmm.unmap_page(dir, va(0x0080_0000)).unwrap();
        assert_eq!(vmm.translate(dir, va(0x0080_0000)), None);
        assert_eq!(vmm.frames().free_frames(), free + 1);
        assert_eq!(
            vmm.unmap_page(dir, va(0x0080_0000)),
            Err(VmmError::NotMapped(va(0x0080_0000)))
        );
    }

    #[test]
    fn protect_page_changes_permissions_only() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        let dir = vmm.init().unwrap();
        vmm.map_region(dir, va(0x0100_0000), 4096, MemoryType::UserCode)
            .unwrap();
        let before = vmm.translate(dir, va(0x0100_0000));
        assert!(!vmm.is_address_valid(dir, va(0x0100_0000), true, true));

        vmm.protect_page(dir, va(0x0100_0000), MemoryType::UserData.leaf_flags())
            .unwrap();
        assert!(vmm.is_address_valid(dir, va(0x0100_0000), true, true));
        assert_eq!(vmm.translate(dir, va(0x0100_0000)), before);
    }

    #[test]
    fn alloc_pages_advances_the_cursor() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        let dir = vmm.init().unwrap();

        let a = vmm.alloc_pages(2).unwrap();
        let b = vmm.alloc_pages(1).unwrap();
        assert_eq!(a, KERNEL_HEAP_START);
        assert_eq!(b, KERNEL_HEAP_START + 2 * PAGE_SIZE);
        assert!(vmm.is_address_valid(dir, a + PAGE_SIZE, true, false));
        assert_eq!(vmm.alloc_pages(0), None);

        let free = vmm.frames().free_frames();
        vmm.free_pages(a, 2);
        assert_eq!(vmm.frames().free_frames(), free + 2);
        assert_eq!(vmm.translate(dir, a), None);
        assert_eq!(vmm.stats().heap_cursor, KERNEL_HEAP_START + 3 * PAGE_SIZE);
    }

    #[test]
    fn alloc_pages_rolls_back_on_exhaustion() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        let dir = vmm.init().unwrap();

        let free = vmm.frames().free_frames();
        let mapped = vmm.stats().pages_mapped;
        assert_eq!(vmm.alloc_pages(free + 1), None);
        assert_eq!(vmm.frames().free_frames(), free);
        assert_eq!(vmm.stats().pages_mapped, mapped);
        assert_eq!(vmm.translate(dir, KERNEL_HEAP_START), None);
        assert_eq!(vmm.stats().heap_cursor, KERNEL_HEAP_START);
    }

    #[test]
    fn heap_window_bound_is_enforced() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        vmm.init().unwrap();
        let window_pages = (KERNEL_HEAP_END.as_u32() - KERNEL_HEAP_START.as_u32()) / PAGE_SIZE;
        assert_eq!(
            vmm.try_alloc_pages(window_pages + 1),
            Err(VmmError::HeapWindowExhausted)
        );
    }

    #[test]
    fn uninitialized_vmm_has_no_heap_window() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        assert_eq!(vmm.alloc_pages(1), None);
        assert_eq!(vmm.create_user_directory(), Err(VmmError::NotInitialized));
    }

    #[test]
    fn user_directories_share_the_kernel_half() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        let kernel = vmm.init().unwrap();
        let user = vmm.create_user_directory().unwrap();

        assert_eq!(vmm.translate(user, va(0xC000_1000)), Some(pa(0x1000)));
        assert_eq!(vmm.translate(user, va(0x0000_1000)), None);

        // heap pages allocated afterwards are visible through the copy
        let heap_page = vmm.alloc_pages(1).unwrap();
        assert_eq!(
            vmm.translate(user, heap_page),
            vmm.translate(kernel, heap_page)
        );

        let bottom = vmm
            .setup_user_stack(user, USER_STACK_TOP, 4 * PAGE_SIZE)
            .unwrap();
        assert_eq!(bottom, va(USER_STACK_TOP.as_u32() - 4 * PAGE_SIZE));
        assert!(vmm.is_address_valid(user, bottom, true, true));
        assert!(vmm.is_address_valid(user, va(USER_STACK_TOP.as_u32() - 1), true, true));
        assert!(!vmm.is_address_valid(user, USER_STACK_TOP, false, true));
        assert!(!vmm.is_address_valid(kernel, bottom, false, false));

        vmm.setup_user_heap(user, va(0x1000_0000), 2 * PAGE_SIZE)
            .unwrap();
        assert!(vmm.is_address_valid(user, va(0x1000_1FFF), true, true));
        assert_eq!(
            vmm.setup_user_heap(user, va(0xBFFF_F000), 2 * PAGE_SIZE),
            Err(VmmError::InvalidRange)
        );
        assert_eq!(
            vmm.setup_user_stack(user, va(0xC000_1000), PAGE_SIZE),
            Err(VmmError::InvalidRange)
        );
        assert!(USER_STACK_SIZE > 4 * PAGE_SIZE);
    }

    #[test]
    fn unaligned_regions_cover_their_last_byte() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        vmm.init().unwrap();
        let user = vmm.create_user_directory().unwrap();

        vmm.setup_user_heap(user, va(0x1000_0800), PAGE_SIZE).unwrap();
        assert!(vmm.is_address_valid(user, va(0x1000_0800), true, true));
        assert!(vmm.is_address_valid(user, va(0x1000_17FF), true, true));
        assert!(!vmm.is_address_valid(user, va(0x1000_2000), false, true));

        let bottom = vmm
            .setup_user_stack(user, va(0x2000_0800), PAGE_SIZE)
            .unwrap();
        assert_eq!(bottom, va(0x1FFF_F800));
        assert!(vmm.is_address_valid(user, bottom, true, true));
        assert!(vmm.is_address_valid(user, va(0x2000_07FF), true, true));

        assert_eq!(
            vmm.map_region(user, va(0xFFFF_F800), PAGE_SIZE, MemoryType::UserData),
            Err(VmmError::InvalidRange)
        );
    }

    #[test]
    fn destroying_a_user_directory_returns_every_frame() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        let kernel = vmm.init().unwrap();
        let free = vmm.frames().free_frames();
        let stats = vmm.stats();

        let user = vmm.create_user_directory().unwrap();
        vmm.setup_user_stack(user, USER_STACK_TOP, 8 * PAGE_SIZE)
            .unwrap();
        vmm.setup_user_heap(user, va(0x1000_0000), 8 * PAGE_SIZE)
            .unwrap();
        vmm.destroy_user_directory(user).unwrap();

        assert_eq!(vmm.frames().free_frames(), free);
        assert_eq!(vmm.stats().pages_mapped, stats.pages_mapped);
        assert_eq!(vmm.stats().page_tables_allocated, stats.page_tables_allocated);
        assert_eq!(vmm.translate(kernel, va(0xC000_1000)), Some(pa(0x1000)));
        assert_eq!(
            vmm.destroy_user_directory(kernel),
            Err(VmmError::ProtectionViolation)
        );
    }

    #[test]
    fn serves_heap_pages() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        vmm.init().unwrap();
        let provider: &mut dyn PageProvider = &mut vmm;
        let ptr = provider.alloc_pages(4).unwrap();
        assert_eq!(ptr.as_ptr() as usize, KERNEL_HEAP_START.as_usize());
        provider.free_pages(ptr, 4);
        assert_eq!(vmm.translate(vmm.kernel_directory().unwrap(), KERNEL_HEAP_START), None);
    }

    #[test]
    fn stats_printer() {
        let (mapper, platform) = setup();
        let mut vmm = Vmm::new(&mapper, &platform, pmm());
        vmm.init().unwrap();
        let mut out = std::string::String::new();
        core::fmt::write(&mut out, format_args!("{}", vmm.stats())).unwrap();
        assert!(out.contains("Paging: enabled"));
        assert!(out.contains("Pages mapped: 2048"));
    }
}
