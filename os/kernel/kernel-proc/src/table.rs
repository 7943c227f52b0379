use crate::pid::Pid;
use crate::process::Process;

/// Fixed-capacity process table indexed by pid. Slot 0 stays empty.
pub struct ProcessTable<const N: usize> {
    slots: [Option<Process>; N],
    next_pid: u32,
    len: usize,
}

impl<const N: usize> ProcessTable<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; N],
            next_pid: 1,
            len: 0,
        }
    }

    /// Processes that can exist at once.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N.saturating_sub(1)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hand out `next_pid` if its slot is free, else the first free slot.
    pub fn allocate_pid(&mut self) -> Option<Pid> {
        let candidate = self.next_pid as usize;
        if candidate > 0 && candidate < N && self.slots[candidate].is_none() {
            self.next_pid += 1;
            return Some(Pid::new(self.next_pid - 1));
        }
        let slot = (1..N).find(|&i| self.slots[i].is_none())?;
        let pid = u32::try_from(slot).ok()?;
        self.next_pid = pid + 1;
        Some(Pid::new(pid))
    }

    /// Store `process` in the slot of its pid.
    ///
    /// # Panics
    /// If the slot is out of range or taken; pids come from
    /// [`allocate_pid`](Self::allocate_pid).
    pub(crate) fn insert(&mut self, process: Process) {
        let slot = &mut self.slots[process.pid.slot()];
        assert!(slot.is_none(), "pid {} already in use", process.pid);
        *slot = Some(process);
        self.len += 1;
    }

    pub(crate) fn remove(&mut self, pid: Pid) -> Option<Process> {
        let removed = self.slots.get_mut(pid.slot())?.take();
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid.slot())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid.slot())?.as_mut()
    }

    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        self.get(pid).is_some()
    }

    /// Live processes in pid order.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

impl<const N: usize> Default for ProcessTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Priority;

    fn process(pid: Pid) -> Process {
        Process::new(pid, "p", 0, Priority::Normal, None)
    }

    #[test]
    fn pids_count_up_then_reuse_the_first_hole() {
        let mut table = ProcessTable::<4>::new();
        assert_eq!(table.capacity(), 3);
        for expected in 1..=3 {
            let pid = table.allocate_pid().unwrap();
            assert_eq!(pid, Pid::new(expected));
            table.insert(process(pid));
        }
        assert_eq!(table.allocate_pid(), None);

        table.remove(Pid::new(2)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.allocate_pid(), Some(Pid::new(2)));
    }

    #[test]
    fn out_of_range_pids_are_absent() {
        let mut table = ProcessTable::<4>::new();
        assert!(table.get(Pid::new(0)).is_none());
        assert!(table.get(Pid::new(99)).is_none());
        assert!(table.remove(Pid::new(99)).is_none());
        assert!(table.is_empty());
    }
}
