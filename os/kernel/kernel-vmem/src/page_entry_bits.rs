use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// A single 32-bit page-directory or page-table entry in its raw bitfield form.
///
/// The directory entry (PDE) and the table entry (PTE) share one layout in
/// 32-bit paging; `dirty`, `global_translation` and `large_page` only mean
/// something in the positions noted below.
///
/// ### Bit layout
///
/// | Bits   | Name            | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS`            | 4 MiB page (PDE only, unused here) |
/// | 8      | `G`             | Global (PTE only) |
/// | 9–11   | OS available    | Ignored by hardware |
/// | 12–31  | `addr`          | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::kernel_rw().with_physical_address(PhysicalAddress::new(0x0030_0000));
/// assert!(e.present() && e.writable() && !e.user_access());
/// assert_eq!(e.into_bits(), 0x0030_0103);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Clear means the entry must not be followed, whatever else it holds.
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Both the PDE and the PTE must allow user access for ring 3 to reach the page.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS, bit 7). Always clear: only 4 KiB leaves are used.
    pub large_page: bool,

    /// Global (G, bit 8). The translation survives CR3 reloads.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_4k: u32,
}

impl PageEntryBits {
    /// Physical base stored in this entry (low 12 bits zero).
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_4k() << 12)
    }

    /// Store the 4 KiB-aligned base of `pa`; the offset bits are dropped.
    #[inline]
    pub const fn set_physical_address(&mut self, pa: PhysicalAddress) {
        self.set_frame_4k(pa.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, pa: PhysicalAddress) -> Self {
        self.set_physical_address(pa);
        self
    }

    /// The same permission and cache bits with the address cleared.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        self.with_frame_4k(0)
    }

    /// Present, writable, supervisor-only, global.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_global_translation(true)
    }

    /// Present, read-only, supervisor-only, global.
    #[must_use]
    pub const fn kernel_ro() -> Self {
        Self::new().with_present(true).with_global_translation(true)
    }

    /// Present, writable, user accessible.
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// Present, read-only, user accessible.
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::new().with_present(true).with_user_access(true)
    }

    /// Flags for a directory entry that links a page table. Writable so the
    /// leaf entries alone decide write permission.
    #[must_use]
    pub const fn table_link(user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_flag_values_match_hardware_layout() {
        assert_eq!(PageEntryBits::new().with_present(true).into_bits(), 0x001);
        assert_eq!(PageEntryBits::new().with_writable(true).into_bits(), 0x002);
        assert_eq!(PageEntryBits::new().with_user_access(true).into_bits(), 0x004);
        assert_eq!(PageEntryBits::new().with_write_through(true).into_bits(), 0x008);
        assert_eq!(PageEntryBits::new().with_cache_disabled(true).into_bits(), 0x010);
        assert_eq!(PageEntryBits::new().with_accessed(true).into_bits(), 0x020);
        assert_eq!(PageEntryBits::new().with_dirty(true).into_bits(), 0x040);
        assert_eq!(PageEntryBits::new().with_large_page(true).into_bits(), 0x080);
        assert_eq!(PageEntryBits::new().with_global_translation(true).into_bits(), 0x100);
    }

    #[test]
    fn address_keeps_flags_intact() {
        let mut e = PageEntryBits::user_ro();
        e.set_physical_address(PhysicalAddress::new(0x00AB_C123));
        assert_eq!(e.physical_address(), PhysicalAddress::new(0x00AB_C000));
        assert_eq!(e.flags_only(), PageEntryBits::user_ro());
    }
}
