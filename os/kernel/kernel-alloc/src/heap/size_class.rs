//! Size classes: which free list a block lives on.

/// Upper bound of the small class.
pub const SMALL_BLOCK_SIZE: usize = 64;
/// Upper bound of the medium class.
pub const MEDIUM_BLOCK_SIZE: usize = 1024;
/// Largest request served from blocks; anything bigger takes whole pages.
pub const LARGE_BLOCK_SIZE: usize = 4096;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub const ALL: [Self; 3] = [Self::Small, Self::Medium, Self::Large];

    /// Class for a payload of `size` bytes. Free blocks bigger than the
    /// large ceiling still file under `Large`.
    #[must_use]
    pub const fn of(size: usize) -> Self {
        if size <= SMALL_BLOCK_SIZE {
            Self::Small
        } else if size <= MEDIUM_BLOCK_SIZE {
            Self::Medium
        } else {
            Self::Large
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// This class and every larger one, smallest first.
    pub fn and_larger(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().skip(self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(SizeClass::of(64), SizeClass::Small);
        assert_eq!(SizeClass::of(72), SizeClass::Medium);
        assert_eq!(SizeClass::of(1024), SizeClass::Medium);
        assert_eq!(SizeClass::of(1032), SizeClass::Large);
        assert_eq!(SizeClass::of(1 << 20), SizeClass::Large);
    }

    #[test]
    fn escalation_order() {
        let v: std::vec::Vec<_> = SizeClass::Medium.and_larger().collect();
        assert_eq!(v, [SizeClass::Medium, SizeClass::Large]);
    }
}
