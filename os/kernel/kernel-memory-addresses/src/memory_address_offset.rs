use crate::{MemoryAddress, MemoryPage, PageSize};
use core::fmt;
use core::marker::PhantomData;
use core::ops::Add;

/// Byte position inside a page of size `S`, always `< S::SIZE`.
///
/// For [`Size4K`](crate::Size4K) this is the low 12 bits of a 32-bit address;
/// for [`Size4M`](crate::Size4M) the low 22 bits, i.e. everything below the
/// page-directory index.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddressOffset<S: PageSize> {
    bits: u32,
    _size: PhantomData<S>,
}

impl<S: PageSize> MemoryAddressOffset<S> {
    /// Start of the page.
    pub const ZERO: Self = Self::masked(0);

    const fn masked(bits: u32) -> Self {
        Self {
            bits: bits & (S::SIZE - 1),
            _size: PhantomData,
        }
    }

    /// Keep the low bits of `value`; debug builds reject anything past the page.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        debug_assert!(value < S::SIZE, "offset must be < page size");
        Self::masked(value)
    }

    /// `None` unless `value` lies inside one page.
    #[inline]
    #[must_use]
    pub const fn try_new(value: u32) -> Option<Self> {
        if value < S::SIZE {
            Some(Self::masked(value))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self::masked(addr.as_u32())
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.bits
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.bits == 0
    }

    /// Bytes from here to the end of the page, `1..=S::SIZE`.
    #[inline]
    #[must_use]
    pub const fn remaining(self) -> u32 {
        S::SIZE - self.bits
    }
}

impl<S: PageSize> fmt::Debug for MemoryAddressOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset<{}>({:#05X})", S::as_str(), self.bits)
    }
}

impl<S: PageSize> fmt::Display for MemoryAddressOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#X}", self.bits)
    }
}

impl<S: PageSize> Add<MemoryAddressOffset<S>> for MemoryPage<S> {
    type Output = MemoryAddress;
    #[inline]
    fn add(self, rhs: MemoryAddressOffset<S>) -> Self::Output {
        self.join(rhs)
    }
}

impl<S: PageSize> From<MemoryAddress> for MemoryPage<S> {
    #[inline]
    fn from(addr: MemoryAddress) -> Self {
        Self::from_addr(addr)
    }
}

impl<S: PageSize> From<MemoryAddress> for MemoryAddressOffset<S> {
    #[inline]
    fn from(addr: MemoryAddress) -> Self {
        Self::from_addr(addr)
    }
}
