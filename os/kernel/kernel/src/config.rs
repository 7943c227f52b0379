//! Boot-time configuration.

use kernel_alloc::frame_alloc::PmmConfig;
use kernel_alloc::heap::HeapConfig;
use kernel_info::boot::MemoryRegion;
use kernel_info::process::TIMER_FREQUENCY_HZ;

/// Everything [`Kernel::boot`](crate::Kernel::boot) needs to know up front.
#[derive(Debug, Copy, Clone)]
pub struct KernelConfig {
    pub pmm: PmmConfig,
    pub heap: HeapConfig,
    /// Boot memory map. Without one the whole [`PmmConfig`] range is
    /// treated as usable RAM.
    pub memory_map: Option<&'static [MemoryRegion]>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            pmm: PmmConfig::default(),
            heap: HeapConfig::default(),
            memory_map: None,
        }
    }
}

/// Whole timer ticks covering `ms` milliseconds, rounded up.
#[must_use]
pub const fn ms_to_ticks(ms: u64) -> u64 {
    ms.saturating_mul(TIMER_FREQUENCY_HZ as u64).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_round_up() {
        assert_eq!(ms_to_ticks(0), 0);
        assert_eq!(ms_to_ticks(1), 1);
        assert_eq!(ms_to_ticks(10), 1);
        assert_eq!(ms_to_ticks(11), 2);
        assert_eq!(ms_to_ticks(1000), u64::from(TIMER_FREQUENCY_HZ));
    }
}
