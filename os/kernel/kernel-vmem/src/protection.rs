//! Mapping intents and the leaf flags they translate to.

use crate::PageEntryBits;

/// What a mapping is used for.
///
/// Kernel kinds are supervisor-only and global; user kinds are reachable
/// from ring 3 and never global, so they drop out on an address-space switch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemoryType {
    KernelCode,
    KernelData,
    KernelHeap,
    UserCode,
    UserData,
    UserStack,
    UserHeap,
}

impl MemoryType {
    /// Leaf (PTE) flags for this kind.
    #[must_use]
    pub const fn leaf_flags(self) -> PageEntryBits {
        match self {
            Self::KernelCode => PageEntryBits::kernel_ro(),
            Self::KernelData | Self::KernelHeap => PageEntryBits::kernel_rw(),
            Self::UserCode => PageEntryBits::user_ro(),
            Self::UserData | Self::UserStack | Self::UserHeap => PageEntryBits::user_rw(),
        }
    }

    #[must_use]
    pub const fn is_user(self) -> bool {
        matches!(
            self,
            Self::UserCode | Self::UserData | Self::UserStack | Self::UserHeap
        )
    }
}

impl From<MemoryType> for PageEntryBits {
    fn from(value: MemoryType) -> Self {
        value.leaf_flags()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_read_only() {
        assert!(!MemoryType::KernelCode.leaf_flags().writable());
        assert!(!MemoryType::UserCode.leaf_flags().writable());
        assert!(MemoryType::UserCode.leaf_flags().user_access());
    }

    #[test]
    fn user_kinds_are_not_global() {
        for kind in [
            MemoryType::UserCode,
            MemoryType::UserData,
            MemoryType::UserStack,
            MemoryType::UserHeap,
        ] {
            assert!(kind.is_user());
            assert!(!kind.leaf_flags().global_translation());
        }
        assert!(MemoryType::KernelHeap.leaf_flags().global_translation());
    }
}
