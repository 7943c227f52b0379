//! # Virtual Memory Support
//!
//! 32-bit x86 paging helpers for the kernel.
//!
//! ## What you get
//! - An [`address space`](address_space) rooted at one page directory.
//! - Raw entry bits ([`PageEntryBits`]) with the hardware layout.
//! - 4 KiB-aligned [`PageDirectory`] / [`PageTable`] wrappers and index helpers.
//! - [`MemoryType`], the mapping intents and their leaf flags.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! ```text
//!  CR3 → PD → PT → Physical Page
//!         │    └───► PTE (Page Table Entry)     → maps 4 KiB page
//!         └────────► PDE (Page Directory Entry) → points to a PT
//! ```
//!
//! Both levels hold 1024 entries of 4 bytes, so each table fits one frame.
//! A directory entry covers 4 MiB; the full directory covers 4 GiB.
//!
//! Directory slots 768..1024 (`0xC000_0000` and up) form the kernel half and
//! are shared by every address space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "hosted"))]
extern crate alloc;

pub mod address_space;
#[cfg(any(test, feature = "hosted"))]
mod arena;
mod page_entry_bits;
pub mod page_table;
mod protection;

pub use crate::address_space::{AddressSpace, AddressSpaceError, TableAllocation};
#[cfg(any(test, feature = "hosted"))]
pub use crate::arena::ArenaPhysMapper;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PageDirectory, PageTable, PdEntry, PdIndex, PtEntry, PtIndex};
pub use crate::protection::MemoryType;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Minimal frame allocator used when page tables must be created.
pub trait FrameAlloc {
    /// Hand out one 4 KiB frame, or `None` when exhausted.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, page: PhysicalPage<Size4K>);
}

/// Access to physical memory from kernel code.
pub trait PhysMapper {
    /// Map a physical address to a mutable reference.
    ///
    /// # Safety
    /// `pa` must be reachable through this mapper, aligned for `T`, and not
    /// aliased by another live reference for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Called once right after paging is turned on, for mappers whose view
    /// of physical memory changes at that point.
    fn on_paging_enabled(&self) {}

    /// The page directory stored in `page`.
    fn directory_mut<'a>(&self, page: PhysicalPage<Size4K>) -> &'a mut PageDirectory {
        // SAFETY: every page handed to this is a page-table frame owned by
        // the paging code.
        unsafe { self.phys_to_mut::<PageDirectory>(page.base()) }
    }

    /// The page table stored in `page`.
    fn table_mut<'a>(&self, page: PhysicalPage<Size4K>) -> &'a mut PageTable {
        // SAFETY: as above.
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }
}

/// Round `x` down to a multiple of `a` (a power of two).
#[inline]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Round `x` up to a multiple of `a` (a power of two), `None` on overflow.
#[inline]
#[must_use]
pub const fn checked_align_up(x: u32, a: u32) -> Option<u32> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_down(0x1234, 0x1000), 0x1000);
        assert_eq!(checked_align_up(0x1234, 0x1000), Some(0x2000));
        assert_eq!(checked_align_up(0x2000, 0x1000), Some(0x2000));
        assert_eq!(checked_align_up(u32::MAX, 0x1000), None);
    }

    #[test]
    fn arena_mapper_reaches_tables() {
        let mapper = ArenaPhysMapper::new(64 * 1024);
        let page = PhysicalAddress::new(0x2000).page();
        let pt = mapper.table_mut(page);
        pt.set(PtIndex::new(1), PtEntry::make_4k(PhysicalAddress::new(0x5000).page(), PageEntryBits::kernel_rw()));
        // entry 1 lives at byte offset 4; low byte holds the flags
        assert_eq!(mapper.read_byte(PhysicalAddress::new(0x2004)), 0x03);
        assert_eq!(mapper.read_byte(PhysicalAddress::new(0x2005)), 0x51);
    }
}
