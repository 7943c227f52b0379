use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3 — Page Directory Base Register (32-bit paging, no PAE).
///
/// Holds the physical frame of the active page directory and the cache
/// controls used when the MMU reads it.
#[bitfield(u32)]
pub struct Cr3 {
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3 — PWT: write-through for page-directory accesses.
    pub pwt: bool,

    /// Bit 4 — PCD: cache disable for page-directory accesses.
    pub pcd: bool,

    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–31 — page directory physical base >> 12.
    #[bits(20)]
    page_directory_4k: u32,
}

impl Cr3 {
    /// CR3 value selecting `directory` with default caching.
    #[must_use]
    pub const fn from_directory(directory: PhysicalPage<Size4K>) -> Self {
        Self::new().with_page_directory_4k(directory.number())
    }

    /// Physical address of the page directory.
    #[must_use]
    pub const fn directory(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.page_directory_4k() << 12)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_round_trip() {
        let dir = PhysicalAddress::new(0x0020_3000).page::<Size4K>();
        let cr3 = Cr3::from_directory(dir);
        assert_eq!(cr3.into_bits(), 0x0020_3000);
        assert_eq!(cr3.directory(), dir.base());
        assert!(!cr3.pwt() && !cr3.pcd());
    }
}
