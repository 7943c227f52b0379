//! # Boot Memory Map
//!
//! The layout handed over by the boot loader, in the multiboot convention.

use kernel_memory_addresses::PhysicalAddress;

/// Kind of a physical memory region as reported by the boot loader.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// Usable RAM.
    Available = 1,
    /// Firmware or device owned; never handed out.
    Reserved = 2,
    /// ACPI tables, reclaimable after parsing.
    AcpiReclaimable = 3,
    /// ACPI non-volatile storage.
    AcpiNvs = 4,
    /// Defective RAM.
    Bad = 5,
}

/// One entry of the boot memory map.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: PhysicalAddress,
    /// Length in bytes.
    pub length: u32,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u32, length: u32, kind: MemoryRegionKind) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            length,
            kind,
        }
    }

    /// Exclusive end address, widened so a region ending at 4 GiB does not wrap.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u32() as u64 + self.length as u64
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.kind, MemoryRegionKind::Available)
    }
}
