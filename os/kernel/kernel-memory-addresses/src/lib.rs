//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and page bases used
//! in two-level paging and frame allocation code.
//!
//! ## Overview
//!
//! The types in this crate prevent mixing virtual and physical addresses at
//! compile time while remaining zero-cost wrappers around `u32` values.
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory (frames). |
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: 4 KiB pages, the frame and page granularity.
//! - [`Size4M`]: 4 MiB, the span covered by a single page-directory entry.
//!
//! ## Typical Usage
//!
//! ```rust
//! use kernel_memory_addresses::*;
//!
//! let va = VirtualAddress::new(0xC000_1234);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0xC000_1000);
//! assert_eq!(off.as_u32(), 0x234);
//!
//! let region = va.page::<Size4M>();
//! assert_eq!(region.base().as_u32(), 0xC000_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_4k() {
        let a = MemoryAddress::new(0x89AB_CDEF);
        let (p, o) = a.split::<Size4K>();
        assert_eq!(p.base().as_u32(), 0x89AB_C000);
        assert_eq!(o.as_u32(), 0xDEF);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn split_and_join_4m() {
        let a = MemoryAddress::new(0xC012_3456);
        let (p, o) = a.split::<Size4M>();
        assert_eq!(p.base().as_u32(), 0xC000_0000);
        assert_eq!(o.as_u32(), 0x0012_3456);
        assert_eq!(p.join(o), a);
        assert_eq!(p.number(), 0x300);
    }

    #[test]
    fn virtual_vs_physical_wrappers() {
        let va = VirtualAddress::new(0xBFFF_E123);
        let (vp, vo) = va.split::<Size4K>();
        assert_eq!(vp.base().as_u32(), 0xBFFF_E000);
        assert_eq!(vp.join(vo), va);

        let pa = PhysicalAddress::new(0x0030_0042);
        let (pp, po) = pa.split::<Size4K>();
        assert_eq!(pp.number(), 0x300);
        assert_eq!(po.as_u32(), 0x42);
        assert_eq!(pp.join(po), pa);
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u32(), 0x12000);
        assert_eq!(a.checked_align_up::<Size4K>(), Some(MemoryAddress::new(0x13000)));
        assert!(!a.is_aligned::<Size4K>());
        assert!(MemoryAddress::new(0x40_0000).is_aligned::<Size4M>());
        assert_eq!(MemoryAddress::new(0xFFFF_F001).checked_align_up::<Size4K>(), None);
    }

    #[test]
    fn forward_stops_at_end_of_address_space() {
        let p = VirtualAddress::new(0xFFFF_E000).page::<Size4K>();
        assert_eq!(
            p.checked_forward(1).map(VirtualPage::base),
            Some(VirtualAddress::new(0xFFFF_F000))
        );
        assert_eq!(p.checked_forward(2), None);
    }

    #[test]
    fn try_from_rejects_unaligned() {
        assert!(VirtualPage::<Size4K>::try_from(VirtualAddress::new(0x1001)).is_err());
        assert!(VirtualPage::<Size4K>::try_from(VirtualAddress::new(0x1000)).is_ok());
    }

    #[test]
    fn display_is_zero_padded_hex() {
        assert_eq!(format!("{}", PhysicalAddress::new(0x1000)), "0x00001000");
        assert_eq!(format!("{:?}", VirtualAddress::new(0xC000_0000)), "VA(0xC0000000)");
    }
}
