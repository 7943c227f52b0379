//! # Address Space (two-level, 32-bit)
//!
//! Helpers to build and query a single virtual address space rooted at a
//! [`PageDirectory`]. Page tables are created on demand from a
//! [`FrameAlloc`] and reached through a [`PhysMapper`].
//!
//! ## Invariants
//!
//! - The root is one 4 KiB frame holding 1024 directory entries.
//! - A non-present entry is never followed.
//! - Only 4 KiB leaves are installed (`PS=0`).
//! - Nothing here touches the TLB; the caller flushes after changing the
//!   active directory.

use crate::page_table::{PageDirectory, PageTable, PdEntry, PdIndex, PtEntry, split_indices};
use crate::{FrameAlloc, PageEntryBits, PhysMapper};
use kernel_info::memory::{ENTRIES_PER_TABLE, KERNEL_PDE_START};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error("out of physical frames for a page table")]
    OutOfFrames,
    #[error("no page table covers {0:?}")]
    MissingTable(VirtualAddress),
    #[error("{0:?} is not mapped")]
    NotMapped(VirtualAddress),
}

/// Whether [`AddressSpace::map_one`] had to allocate a page table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TableAllocation {
    Existing,
    Allocated,
}

/// A page directory plus the mapper used to reach its tables.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View an existing directory.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Allocate and zero a fresh directory.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfFrames`] when `alloc` is exhausted.
    pub fn create<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, AddressSpaceError> {
        let root = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfFrames)?;
        mapper.directory_mut(root).zero();
        Ok(Self { root, mapper })
    }

    /// Physical frame of the directory, the value that goes into CR3.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    fn directory(&self) -> &mut PageDirectory {
        self.mapper.directory_mut(self.root)
    }

    fn leaf_table(&self, va: VirtualAddress) -> Option<&mut PageTable> {
        let (pd_i, _) = split_indices(va);
        let table = self.directory().get(pd_i).next_table()?;
        Some(self.mapper.table_mut(table))
    }

    /// Map one 4 KiB page `va → pa` with `leaf_flags`, creating the page
    /// table if needed. Both addresses are truncated to their page base.
    ///
    /// A new table is linked writable, and user-accessible when the leaf
    /// is. An existing link gains the user bit when a user leaf goes in.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfFrames`] when a page table cannot be allocated.
    pub fn map_one<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        leaf_flags: PageEntryBits,
    ) -> Result<TableAllocation, AddressSpaceError> {
        let (pd_i, pt_i) = split_indices(va);
        let user = leaf_flags.user_access();

        let dir = self.directory();
        let pde = dir.get(pd_i);
        let (table, outcome) = if let Some(table) = pde.next_table() {
            if user && !pde.flags().user_access() {
                dir.set(pd_i, PdEntry::make_table(table, pde.flags().with_user_access(true)));
            }
            (table, TableAllocation::Existing)
        } else {
            let table = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfFrames)?;
            self.mapper.table_mut(table).zero();
            dir.set(pd_i, PdEntry::make_table(table, PageEntryBits::table_link(user)));
            log::trace!("page table {table} for {:?}", pd_i.base());
            (table, TableAllocation::Allocated)
        };

        self.mapper
            .table_mut(table)
            .set(pt_i, PtEntry::make_4k(pa.page(), leaf_flags));
        Ok(outcome)
    }

    /// Clear the leaf for `va` and hand back the frame it mapped. Empty page
    /// tables are left in place.
    ///
    /// # Errors
    /// [`AddressSpaceError::MissingTable`] or [`AddressSpaceError::NotMapped`].
    pub fn unmap_one(&self, va: VirtualAddress) -> Result<PhysicalPage<Size4K>, AddressSpaceError> {
        let (_, pt_i) = split_indices(va);
        let table = self
            .leaf_table(va)
            .ok_or(AddressSpaceError::MissingTable(va))?;
        let frame = table
            .get(pt_i)
            .page_4k()
            .ok_or(AddressSpaceError::NotMapped(va))?;
        table.set(pt_i, PtEntry::zero());
        Ok(frame)
    }

    /// Present leaf entry for `va`, if any.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PtEntry> {
        let (_, pt_i) = split_indices(va);
        let e = self.leaf_table(va)?.get(pt_i);
        e.is_present().then_some(e)
    }

    /// Translate `va` to the physical address it maps to, offset included.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let frame = self.entry(va)?.page_4k()?;
        Some(PhysicalAddress::new(frame.base().as_u32() | va.offset::<Size4K>().as_u32()))
    }

    /// Replace the permission bits of an existing leaf, keeping its frame.
    ///
    /// # Errors
    /// [`AddressSpaceError::MissingTable`] or [`AddressSpaceError::NotMapped`].
    pub fn protect(&self, va: VirtualAddress, leaf_flags: PageEntryBits) -> Result<(), AddressSpaceError> {
        let (_, pt_i) = split_indices(va);
        let table = self
            .leaf_table(va)
            .ok_or(AddressSpaceError::MissingTable(va))?;
        let frame = table
            .get(pt_i)
            .page_4k()
            .ok_or(AddressSpaceError::NotMapped(va))?;
        table.set(pt_i, PtEntry::make_4k(frame, leaf_flags));
        if leaf_flags.user_access() {
            let (pd_i, _) = split_indices(va);
            let dir = self.directory();
            let pde = dir.get(pd_i);
            if !pde.flags().user_access()
                && let Some(t) = pde.next_table()
            {
                dir.set(pd_i, PdEntry::make_table(t, pde.flags().with_user_access(true)));
            }
        }
        Ok(())
    }

    /// Whether an access of the given kind at `va` would succeed. Writes
    /// need `RW` on both levels, user accesses need `US` on both levels.
    #[must_use]
    pub fn is_accessible(&self, va: VirtualAddress, write: bool, user: bool) -> bool {
        let (pd_i, _) = split_indices(va);
        let pde = self.directory().get(pd_i);
        if !pde.is_present() {
            return false;
        }
        let Some(pte) = self.entry(va) else {
            return false;
        };
        let (d, t) = (pde.flags(), pte.flags());
        if write && !(d.writable() && t.writable()) {
            return false;
        }
        if user && !(d.user_access() && t.user_access()) {
            return false;
        }
        true
    }

    /// Copy the kernel half (directory slots 768..1024) from `template` by
    /// value. Both spaces then share the same kernel page tables.
    #[allow(clippy::cast_possible_truncation)]
    pub fn copy_kernel_entries_from(&self, template: &AddressSpace<'_, M>) {
        let src = template.directory();
        let mut copied = [PdEntry::zero(); ENTRIES_PER_TABLE - KERNEL_PDE_START];
        for (slot, e) in copied.iter_mut().enumerate() {
            *e = src.get(PdIndex::new((KERNEL_PDE_START + slot) as u16));
        }
        let dst = self.directory();
        for (slot, e) in copied.into_iter().enumerate() {
            dst.set(PdIndex::new((KERNEL_PDE_START + slot) as u16), e);
        }
    }

    /// Number of present page tables in the user half.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn user_table_count(&self) -> usize {
        let dir = self.directory();
        (0..KERNEL_PDE_START)
            .filter(|&i| dir.get(PdIndex::new(i as u16)).is_present())
            .count()
    }

    /// Free every user-half frame and page table back to `alloc` and clear
    /// the user half. Returns how many leaf frames were freed. The kernel
    /// half is shared and left alone.
    #[allow(clippy::cast_possible_truncation)]
    pub fn release_user_half<A: FrameAlloc>(&self, alloc: &mut A) -> usize {
        let mut freed = 0;
        for i in 0..KERNEL_PDE_START {
            let pd_i = PdIndex::new(i as u16);
            let Some(table_page) = self.directory().get(pd_i).next_table() else {
                continue;
            };
            let table = self.mapper.table_mut(table_page);
            for (_, e) in table.present_entries() {
                if let Some(frame) = e.page_4k() {
                    alloc.free_4k(frame);
                    freed += 1;
                }
            }
            table.zero();
            alloc.free_4k(table_page);
            self.directory().set(pd_i, PdEntry::zero());
        }
        freed
    }
}
