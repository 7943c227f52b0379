use super::size_class::SizeClass;
use core::fmt;

/// Counters for one size class.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ClassStats {
    /// Blocks of this class, free or not.
    pub block_count: usize,
    /// Free blocks of this class.
    pub free_count: usize,
    /// Payload bytes currently allocated in this class.
    pub total_allocated: usize,
}

/// A heap snapshot.
///
/// `used_size + free_size + header_size == total_size` always holds; large
/// page allocations are reported separately and are not part of the extent.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub total_size: usize,
    pub used_size: usize,
    pub free_size: usize,
    pub header_size: usize,
    pub largest_free_block: usize,
    pub allocation_count: u64,
    pub free_count: u64,
    pub coalesce_count: u64,
    /// `100 - largest_free * 100 / free`, 0 when nothing is free.
    pub fragmentation_percent: usize,
    pub classes: [ClassStats; 3],
    pub large_allocations: usize,
    pub large_bytes: usize,
}

impl HeapStats {
    #[must_use]
    pub const fn class(&self, class: SizeClass) -> &ClassStats {
        &self.classes[class.index()]
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Heap statistics:")?;
        writeln!(f, "  Total size:   {} KiB", self.total_size / 1024)?;
        writeln!(f, "  Used size:    {} bytes", self.used_size)?;
        writeln!(f, "  Free size:    {} bytes", self.free_size)?;
        writeln!(f, "  Headers:      {} bytes", self.header_size)?;
        writeln!(f, "  Largest free: {} bytes", self.largest_free_block)?;
        writeln!(
            f,
            "  Allocations:  {}  Frees: {}  Coalesces: {}",
            self.allocation_count, self.free_count, self.coalesce_count
        )?;
        writeln!(f, "  Fragmentation: {}%", self.fragmentation_percent)?;
        for class in SizeClass::ALL {
            let c = self.class(class);
            writeln!(
                f,
                "  {:<6} blocks: {}  free: {}  allocated: {} bytes",
                class.name(),
                c.block_count,
                c.free_count,
                c.total_allocated
            )?;
        }
        writeln!(
            f,
            "  Page allocations: {} ({} bytes)",
            self.large_allocations, self.large_bytes
        )
    }
}
