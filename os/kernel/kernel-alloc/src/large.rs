//! Side table for allocations served as whole pages.

/// Maximum number of live page allocations.
pub const MAX_LARGE_ALLOCATIONS: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct LargeAllocation {
    pub base: usize,
    pub pages: usize,
}

impl LargeAllocation {
    pub const fn bytes(&self) -> usize {
        self.pages * crate::heap::PAGE_BYTES
    }

    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.bytes()
    }
}

pub(crate) struct LargeTable {
    entries: [Option<LargeAllocation>; MAX_LARGE_ALLOCATIONS],
}

impl LargeTable {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_LARGE_ALLOCATIONS],
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.iter().all(Option::is_some)
    }

    pub fn insert(&mut self, entry: LargeAllocation) -> bool {
        match self.entries.iter_mut().find(|e| e.is_none()) {
            Some(slot) => {
                *slot = Some(entry);
                true
            }
            None => false,
        }
    }

    /// The allocation starting exactly at `base`.
    pub fn get(&self, base: usize) -> Option<LargeAllocation> {
        self.entries.iter().flatten().find(|e| e.base == base).copied()
    }

    /// The allocation whose pages contain `addr`.
    pub fn containing(&self, addr: usize) -> Option<LargeAllocation> {
        self.entries.iter().flatten().find(|e| e.contains(addr)).copied()
    }

    pub fn remove(&mut self, base: usize) -> Option<LargeAllocation> {
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.is_some_and(|e| e.base == base))?;
        slot.take()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LargeAllocation> {
        self.entries.iter().flatten()
    }
}
