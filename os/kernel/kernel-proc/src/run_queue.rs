use crate::pid::Pid;

/// FIFO of ready pids, linked through per-slot indices.
///
/// Each pid is queued at most once; insert, remove and pop are O(1).
pub struct RunQueue<const N: usize> {
    head: Option<Pid>,
    tail: Option<Pid>,
    next: [Option<Pid>; N],
    prev: [Option<Pid>; N],
    queued: [bool; N],
    len: usize,
}

impl<const N: usize> RunQueue<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            next: [None; N],
            prev: [None; N],
            queued: [false; N],
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn head(&self) -> Option<Pid> {
        self.head
    }

    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        self.queued.get(pid.slot()).copied().unwrap_or(false)
    }

    /// Append `pid`. Returns `false` if it was already queued or out of range.
    pub fn push_back(&mut self, pid: Pid) -> bool {
        let slot = pid.slot();
        if slot >= N || self.queued[slot] {
            return false;
        }
        self.queued[slot] = true;
        self.next[slot] = None;
        self.prev[slot] = self.tail;
        match self.tail {
            Some(tail) => self.next[tail.slot()] = Some(pid),
            None => self.head = Some(pid),
        }
        self.tail = Some(pid);
        self.len += 1;
        true
    }

    pub fn pop_front(&mut self) -> Option<Pid> {
        let head = self.head?;
        self.remove(head);
        Some(head)
    }

    /// Unlink `pid`. Returns `false` if it was not queued.
    pub fn remove(&mut self, pid: Pid) -> bool {
        if !self.contains(pid) {
            return false;
        }
        let slot = pid.slot();
        let (prev, next) = (self.prev[slot], self.next[slot]);
        match prev {
            Some(p) => self.next[p.slot()] = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.prev[n.slot()] = prev,
            None => self.tail = prev,
        }
        self.next[slot] = None;
        self.prev[slot] = None;
        self.queued[slot] = false;
        self.len -= 1;
        true
    }

    /// Queued pids, head first.
    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        core::iter::successors(self.head, |p| self.next[p.slot()])
    }
}

impl<const N: usize> Default for RunQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn pids(q: &RunQueue<8>) -> Vec<u32> {
        q.iter().map(Pid::as_u32).collect()
    }

    #[test]
    fn fifo_order_with_removal_from_the_middle() {
        let mut q = RunQueue::<8>::new();
        for p in [2, 3, 4, 5] {
            assert!(q.push_back(Pid::new(p)));
        }
        assert!(!q.push_back(Pid::new(3)));
        assert!(q.remove(Pid::new(4)));
        assert!(!q.remove(Pid::new(4)));
        assert_eq!(pids(&q), [2, 3, 5]);

        assert_eq!(q.pop_front(), Some(Pid::new(2)));
        assert!(q.remove(Pid::new(5)));
        assert_eq!(pids(&q), [3]);
        assert_eq!(q.head(), Some(Pid::new(3)));

        q.push_back(Pid::new(2));
        assert_eq!(pids(&q), [3, 2]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn empties_cleanly() {
        let mut q = RunQueue::<8>::new();
        q.push_back(Pid::new(1));
        assert_eq!(q.pop_front(), Some(Pid::new(1)));
        assert_eq!(q.pop_front(), None);
        assert!(q.is_empty());
        assert!(!q.push_back(Pid::new(8)));
    }
}
