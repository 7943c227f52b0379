//! # Round-Robin Scheduler
//!
//! Owns the process table and the run queue. The scheduler decides; it
//! never switches stacks itself. [`Scheduler::schedule`] returns a
//! [`ScheduleOutcome`], and the caller turns it into a [`ContextSwitch`]
//! and performs it through the [`Platform`] once it has left its critical
//! section.
//!
//! Policy:
//! - Strict FIFO. [`Priority`] is recorded and listed, nothing more.
//! - The running process goes to the tail of the queue on every decision.
//! - With the queue empty the running process keeps the CPU, or the idle
//!   process takes over if nothing is running.
//! - The idle process (pid 1) is never queued and can never be killed.

use crate::ProcessError;
use crate::memory::ProcessMemory;
use crate::pid::Pid;
use crate::process::{MemoryRegion, Process};
use crate::run_queue::RunQueue;
use crate::state::{Priority, ProcessState};
use crate::table::ProcessTable;
use core::fmt;
use core::ptr::NonNull;
use kernel_info::process::{MAX_PROCESSES, PROCESS_STACK_SIZE};
use kernel_registers::{CpuContext, Platform};

/// Name of the idle process.
pub const IDLE_NAME: &str = "kernel_idle";

/// Exit code recorded for a process terminated from outside.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Signal number that terminates the target.
pub const SIGKILL: i32 = 9;

/// What one scheduling decision picked.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// The process that was current before the decision, if any.
    pub previous: Option<Pid>,
    pub next: Pid,
    /// Whether `next` differs from `previous`.
    pub switch: bool,
}

/// A context switch ready to execute.
///
/// The pointers address contexts inside the process table. They stay valid
/// until the scheduler is mutated again.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ContextSwitch {
    /// Where to save the outgoing context; `None` if it is gone.
    pub save: Option<*mut CpuContext>,
    pub load: *const CpuContext,
}

impl ContextSwitch {
    /// Hand the CPU to the loaded context.
    ///
    /// # Safety
    /// The scheduler these pointers came from must not be touched until the
    /// switch returns, and the loaded context must have a mapped stack.
    pub unsafe fn perform<P: Platform + ?Sized>(self, platform: &P) {
        // SAFETY: forwarded to the caller.
        unsafe {
            match self.save {
                Some(save) => platform.switch_context(save, self.load),
                None => platform.resume_context(self.load),
            }
        }
    }
}

/// Process table, run queue and the scheduling clock.
pub struct Scheduler<const N: usize = MAX_PROCESSES> {
    table: ProcessTable<N>,
    queue: RunQueue<N>,
    current: Option<Pid>,
    ticks: u64,
    context_switches: u64,
}

impl<const N: usize> Scheduler<N> {
    /// A scheduler whose only process is the running idle process. The
    /// caller's own flow of control becomes that process.
    #[must_use]
    pub fn new() -> Self {
        const { assert!(N > Pid::IDLE.slot(), "process table too small for the idle process") };
        let mut table = ProcessTable::new();
        let mut idle = Process::new(Pid::IDLE, IDLE_NAME, 0, Priority::Low, None);
        idle.state = ProcessState::Running;
        table.insert(idle);
        log::info!("scheduler: {IDLE_NAME} running as pid {}", Pid::IDLE);
        Self {
            table,
            queue: RunQueue::new(),
            current: Some(Pid::IDLE),
            ticks: 0,
            context_switches: 0,
        }
    }

    /// Pid 0 and the idle process.
    #[must_use]
    pub const fn is_protected(pid: Pid) -> bool {
        pid.as_u32() == 0 || pid.as_u32() == Pid::IDLE.as_u32()
    }

    /// The running process.
    #[must_use]
    pub const fn getpid(&self) -> Option<Pid> {
        self.current
    }

    #[must_use]
    pub fn current(&self) -> Option<&Process> {
        self.table.get(self.current?)
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.table.get(pid)
    }

    /// Live processes in pid order, zombies included.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.table.iter()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Pids waiting to run, head first.
    pub fn ready_queue(&self) -> impl Iterator<Item = Pid> + '_ {
        self.queue.iter()
    }

    /// Timer ticks seen so far.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub const fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// Children of `pid`, most recent first.
    pub fn children(&self, pid: Pid) -> impl Iterator<Item = Pid> + '_ {
        let first = self.table.get(pid).and_then(|p| p.first_child);
        core::iter::successors(first, |c| self.table.get(*c).and_then(|p| p.next_sibling))
    }

    /// Create a ready process with a fresh stack and queue it at the tail.
    ///
    /// # Errors
    /// [`ProcessError::TableFull`] or [`ProcessError::OutOfMemory`].
    pub fn create(
        &mut self,
        mem: &mut impl ProcessMemory,
        name: &str,
        entry_point: usize,
        priority: Priority,
    ) -> Result<Pid, ProcessError> {
        let pid = self.table.allocate_pid().ok_or_else(|| {
            log::debug!("scheduler: process table full, cannot create {name}");
            ProcessError::TableFull
        })?;
        let stack = mem.allocate(PROCESS_STACK_SIZE).ok_or_else(|| {
            log::debug!("scheduler: no stack for {name}");
            ProcessError::OutOfMemory
        })?;
        let stack = MemoryRegion {
            base: stack.as_ptr() as usize,
            size: PROCESS_STACK_SIZE,
        };
        self.table
            .insert(Process::new(pid, name, entry_point, priority, Some(stack)));
        self.queue.push_back(pid);
        log::debug!("scheduler: created {name} as pid {pid}, entry {entry_point:#x}");
        Ok(pid)
    }

    /// Duplicate `parent`: same name, entry and priority, a copy of its
    /// context and stack. The child's return register is zero and its stack
    /// pointers are moved into the new stack.
    ///
    /// # Errors
    /// [`ProcessError::NotFound`], [`ProcessError::Protected`] for the idle
    /// process, [`ProcessError::InvalidState`] for a terminated parent, or
    /// an exhaustion error from [`create`](Self::create).
    pub fn fork(&mut self, mem: &mut impl ProcessMemory, parent: Pid) -> Result<Pid, ProcessError> {
        if Self::is_protected(parent) {
            return Err(ProcessError::Protected(parent));
        }
        let source = self.table.get(parent).ok_or(ProcessError::NotFound(parent))?;
        if source.state == ProcessState::Terminated {
            return Err(ProcessError::InvalidState(source.state));
        }
        let (name, entry, priority) = (source.name, source.entry_point, source.priority);
        let (context, parent_stack, first_child) =
            (source.context, source.stack, source.first_child);

        let child = self.create(mem, name.as_str(), entry, priority)?;
        let Some(process) = self.table.get_mut(child) else {
            return Err(ProcessError::NotFound(child));
        };
        process.context = context;
        process.context.set_return_value(0);
        process.parent = Some(parent);
        process.next_sibling = first_child;
        if let (Some(from), Some(to)) = (parent_stack, process.stack) {
            // SAFETY: both regions are live allocations owned by the two
            // processes, and distinct allocations never overlap.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    from.base as *const u8,
                    to.base as *mut u8,
                    from.size.min(to.size),
                );
            }
            let rebase = |sp: usize| {
                if from.contains(sp) || sp == from.end() {
                    to.base + (sp - from.base)
                } else {
                    sp
                }
            };
            process.context.esp = rebase(process.context.esp);
            process.context.ebp = rebase(process.context.ebp);
        }
        if let Some(p) = self.table.get_mut(parent) {
            p.first_child = Some(child);
        }
        log::debug!("scheduler: pid {parent} forked pid {child}");
        Ok(child)
    }

    /// Move `pid` to `Ready`, `Blocked` or `Terminated`, keeping the run
    /// queue in step.
    ///
    /// # Errors
    /// [`ProcessError::InvalidState`] for `Running` as a target or for
    /// leaving `Terminated`; [`ProcessError::Protected`] for the idle process;
    /// [`ProcessError::NotFound`].
    pub fn set_state(&mut self, pid: Pid, state: ProcessState) -> Result<(), ProcessError> {
        if !state.is_settable() {
            return Err(ProcessError::InvalidState(state));
        }
        if Self::is_protected(pid) {
            return Err(ProcessError::Protected(pid));
        }
        let process = self.table.get_mut(pid).ok_or(ProcessError::NotFound(pid))?;
        if process.state == ProcessState::Terminated {
            return if state == ProcessState::Terminated {
                Ok(())
            } else {
                Err(ProcessError::InvalidState(process.state))
            };
        }
        log::debug!("scheduler: pid {pid} {} -> {state}", process.state);
        process.state = state;
        process.wake_tick = None;
        match state {
            ProcessState::Ready => {
                self.queue.push_back(pid);
            }
            ProcessState::Blocked => {
                self.queue.remove(pid);
            }
            ProcessState::Terminated => {
                process.exit_code = Some(KILLED_EXIT_CODE);
                self.queue.remove(pid);
                if self.current == Some(pid) {
                    self.current = None;
                }
            }
            ProcessState::Running => {}
        }
        Ok(())
    }

    /// Block `pid` until `ticks` more timer ticks have passed.
    ///
    /// # Errors
    /// As [`set_state`](Self::set_state).
    pub fn sleep(&mut self, pid: Pid, ticks: u64) -> Result<(), ProcessError> {
        self.set_state(pid, ProcessState::Blocked)?;
        let deadline = self.ticks.saturating_add(ticks);
        if let Some(p) = self.table.get_mut(pid) {
            p.wake_tick = Some(deadline);
        }
        log::trace!("scheduler: pid {pid} sleeps until tick {deadline}");
        Ok(())
    }

    /// Make a blocked process ready before its deadline.
    ///
    /// # Errors
    /// [`ProcessError::NotFound`], or [`ProcessError::InvalidState`] if it is
    /// not blocked.
    pub fn wake(&mut self, pid: Pid) -> Result<(), ProcessError> {
        let state = self.table.get(pid).ok_or(ProcessError::NotFound(pid))?.state;
        if state != ProcessState::Blocked {
            return Err(ProcessError::InvalidState(state));
        }
        self.set_state(pid, ProcessState::Ready)
    }

    /// Terminate the running process with `code`. It stays in the table
    /// until its parent reaps it; nothing is current afterwards, so the next
    /// switch does not save a context.
    ///
    /// # Errors
    /// [`ProcessError::NoCurrentProcess`], or [`ProcessError::Protected`] when
    /// the idle process is running.
    pub fn exit(&mut self, code: i32) -> Result<Pid, ProcessError> {
        let pid = self.current.ok_or(ProcessError::NoCurrentProcess)?;
        if Self::is_protected(pid) {
            return Err(ProcessError::Protected(pid));
        }
        if let Some(p) = self.table.get_mut(pid) {
            p.state = ProcessState::Terminated;
            p.exit_code = Some(code);
            p.wake_tick = None;
        }
        self.queue.remove(pid);
        self.current = None;
        log::debug!("scheduler: pid {pid} exited with code {code}");
        Ok(pid)
    }

    /// Reap the first terminated child of `parent`.
    ///
    /// Returns `Ok(None)` while children exist but none has terminated;
    /// the caller polls.
    ///
    /// # Errors
    /// [`ProcessError::NotFound`] or [`ProcessError::NoChildren`].
    pub fn wait(
        &mut self,
        mem: &mut impl ProcessMemory,
        parent: Pid,
    ) -> Result<Option<(Pid, i32)>, ProcessError> {
        if !self.table.contains(parent) {
            return Err(ProcessError::NotFound(parent));
        }
        let mut any = false;
        let mut zombie = None;
        for child in self.children(parent) {
            any = true;
            if let Some(p) = self.table.get(child)
                && p.state == ProcessState::Terminated
                && self.current != Some(child)
            {
                zombie = Some((child, p.exit_code.unwrap_or(0)));
                break;
            }
        }
        if !any {
            return Err(ProcessError::NoChildren);
        }
        if let Some((child, _)) = zombie {
            self.remove(mem, child);
            log::debug!("scheduler: pid {parent} reaped pid {child}");
        }
        Ok(zombie)
    }

    /// Remove `pid` now, releasing its stack and heap grant.
    ///
    /// # Errors
    /// [`ProcessError::Protected`] for pid 0 and the idle process,
    /// [`ProcessError::NotFound`] otherwise.
    pub fn kill(&mut self, mem: &mut impl ProcessMemory, pid: Pid) -> Result<(), ProcessError> {
        if Self::is_protected(pid) {
            log::warn!("scheduler: pid {pid} is protected");
            return Err(ProcessError::Protected(pid));
        }
        if self.remove(mem, pid).is_none() {
            return Err(ProcessError::NotFound(pid));
        }
        log::debug!("scheduler: killed pid {pid}");
        Ok(())
    }

    /// Deliver `signal`. [`SIGKILL`] turns the target into a zombie with
    /// exit code [`KILLED_EXIT_CODE`]; other signals are only logged.
    ///
    /// # Errors
    /// As [`kill`](Self::kill).
    pub fn kill_with_signal(&mut self, pid: Pid, signal: i32) -> Result<(), ProcessError> {
        if Self::is_protected(pid) {
            log::warn!("scheduler: pid {pid} is protected");
            return Err(ProcessError::Protected(pid));
        }
        if !self.table.contains(pid) {
            return Err(ProcessError::NotFound(pid));
        }
        if signal == SIGKILL {
            self.set_state(pid, ProcessState::Terminated)?;
        } else {
            log::debug!("scheduler: signal {signal} to pid {pid} ignored");
        }
        Ok(())
    }

    /// Free the slot of a terminated process.
    ///
    /// # Errors
    /// [`ProcessError::NotFound`], [`ProcessError::InvalidState`] if it has
    /// not terminated, [`ProcessError::Active`] if it is still current.
    pub fn reclaim(&mut self, mem: &mut impl ProcessMemory, pid: Pid) -> Result<(), ProcessError> {
        let state = self.table.get(pid).ok_or(ProcessError::NotFound(pid))?.state;
        if state != ProcessState::Terminated {
            return Err(ProcessError::InvalidState(state));
        }
        if self.current == Some(pid) {
            return Err(ProcessError::Active(pid));
        }
        self.remove(mem, pid);
        Ok(())
    }

    /// Give `pid` a heap region of `size` bytes, replacing any earlier grant.
    ///
    /// # Errors
    /// [`ProcessError::NotFound`] or [`ProcessError::OutOfMemory`].
    pub fn grant_heap(
        &mut self,
        mem: &mut impl ProcessMemory,
        pid: Pid,
        size: usize,
    ) -> Result<MemoryRegion, ProcessError> {
        let process = self.table.get_mut(pid).ok_or(ProcessError::NotFound(pid))?;
        let ptr = mem.allocate(size).ok_or(ProcessError::OutOfMemory)?;
        let region = MemoryRegion {
            base: ptr.as_ptr() as usize,
            size,
        };
        if let Some(old) = process.heap.replace(region) {
            release(mem, old);
        }
        Ok(region)
    }

    /// One timer tick: account runtime, wake due sleepers, then
    /// [`schedule`](Self::schedule).
    pub fn tick(&mut self) -> ScheduleOutcome {
        self.ticks += 1;
        let now = self.ticks;
        if let Some(pid) = self.current
            && let Some(p) = self.table.get_mut(pid)
            && p.state == ProcessState::Running
        {
            p.runtime_ticks += 1;
        }
        for slot in 1..N {
            let Ok(raw) = u32::try_from(slot) else { break };
            let pid = Pid::new(raw);
            if let Some(p) = self.table.get_mut(pid)
                && p.state == ProcessState::Blocked
                && p.wake_tick.is_some_and(|t| t <= now)
            {
                p.state = ProcessState::Ready;
                p.wake_tick = None;
                self.queue.push_back(pid);
                log::trace!("scheduler: pid {pid} woke at tick {now}");
            }
        }
        self.schedule()
    }

    /// Pick the next process. See the module docs for the policy.
    pub fn schedule(&mut self) -> ScheduleOutcome {
        let previous = self.current;
        let previous_running = previous
            .and_then(|pid| self.table.get(pid))
            .is_some_and(|p| p.state == ProcessState::Running);

        let next = if self.queue.is_empty() {
            match previous {
                Some(pid) if previous_running => pid,
                _ => Pid::IDLE,
            }
        } else {
            if let Some(pid) = previous
                && previous_running
            {
                if let Some(p) = self.table.get_mut(pid) {
                    p.state = ProcessState::Ready;
                }
                if pid != Pid::IDLE {
                    self.queue.push_back(pid);
                }
            }
            self.queue.pop_front().unwrap_or(Pid::IDLE)
        };

        if let Some(p) = self.table.get_mut(next) {
            p.state = ProcessState::Running;
        }
        self.current = Some(next);
        let switch = previous != Some(next);
        if switch {
            self.context_switches += 1;
            log::trace!("scheduler: {previous:?} -> pid {next}");
        }
        ScheduleOutcome {
            previous,
            next,
            switch,
        }
    }

    /// Pointers for the switch `outcome` asks for; `None` if no switch is due.
    pub fn context_switch(&mut self, outcome: &ScheduleOutcome) -> Option<ContextSwitch> {
        if !outcome.switch {
            return None;
        }
        let load = &raw const self.table.get(outcome.next)?.context;
        let save = outcome
            .previous
            .and_then(|pid| self.table.get_mut(pid))
            .map(|p| &raw mut p.context);
        Some(ContextSwitch { save, load })
    }

    /// Drop `pid` from every structure and release its memory.
    fn remove(&mut self, mem: &mut impl ProcessMemory, pid: Pid) -> Option<Process> {
        self.queue.remove(pid);
        let mut process = self.table.remove(pid)?;
        process.state = ProcessState::Terminated;
        if let Some(stack) = process.stack.take() {
            release(mem, stack);
        }
        if let Some(heap) = process.heap.take() {
            release(mem, heap);
        }
        if self.current == Some(pid) {
            self.current = None;
        }
        if let Some(parent) = process.parent {
            self.unlink_child(parent, pid, process.next_sibling);
        }

        // orphans; terminated ones have nobody left to reap them
        let mut cursor = process.first_child;
        while let Some(child) = cursor {
            let Some(c) = self.table.get_mut(child) else { break };
            cursor = c.next_sibling.take();
            c.parent = None;
            if c.state == ProcessState::Terminated && self.current != Some(child) {
                self.remove(mem, child);
            }
        }
        Some(process)
    }

    fn unlink_child(&mut self, parent: Pid, child: Pid, after: Option<Pid>) {
        let Some(p) = self.table.get_mut(parent) else {
            return;
        };
        if p.first_child == Some(child) {
            p.first_child = after;
            return;
        }
        let mut cursor = p.first_child;
        while let Some(pid) = cursor {
            let Some(sibling) = self.table.get_mut(pid) else { return };
            if sibling.next_sibling == Some(child) {
                sibling.next_sibling = after;
                return;
            }
            cursor = sibling.next_sibling;
        }
    }
}

fn release(mem: &mut impl ProcessMemory, region: MemoryRegion) {
    if let Some(ptr) = NonNull::new(region.base as *mut u8) {
        mem.release(ptr);
    }
}

impl<const N: usize> Default for Scheduler<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Process listing.
impl<const N: usize> fmt::Display for Scheduler<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Process List:")?;
        writeln!(f, "{:<5} {:<12} {:<11} {:<7} MEMORY", "PID", "NAME", "STATE", "PRIO")?;
        writeln!(f, "{:<5} {:<12} {:<11} {:<7} ------", "---", "----", "-----", "----")?;
        if self.table.is_empty() {
            return writeln!(f, "(No processes)");
        }
        for p in self.table.iter() {
            let name = p.name();
            let short = name.get(..12).unwrap_or(name);
            writeln!(
                f,
                "{:<5} {:<12} {:<11} {:<7} {}KB",
                p.pid,
                short,
                p.state,
                p.priority,
                p.memory_used() / 1024
            )?;
        }
        Ok(())
    }
}
