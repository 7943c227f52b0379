//! The process control block.

use crate::pid::Pid;
use crate::state::{Priority, ProcessState};
use core::fmt;
use kernel_info::process::{
    DEFAULT_TIME_SLICE, INITIAL_EFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR,
    PROCESS_NAME_LEN,
};
use kernel_registers::CpuContext;
use kernel_registers::eflags::Eflags;

/// A process name, truncated to [`PROCESS_NAME_LEN`] bytes on a character
/// boundary.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ProcessName {
    bytes: [u8; PROCESS_NAME_LEN],
    len: u8,
}

impl ProcessName {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(PROCESS_NAME_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; PROCESS_NAME_LEN];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            bytes,
            len: u8::try_from(len).unwrap_or(u8::MAX),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Built from a `&str` cut on a char boundary.
        core::str::from_utf8(&self.bytes[..usize::from(self.len)]).unwrap_or_default()
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A block of kernel memory owned by a process, by address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: usize,
    pub size: usize,
}

impl MemoryRegion {
    #[must_use]
    pub const fn end(&self) -> usize {
        self.base + self.size
    }

    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Process control block.
#[derive(Debug, Clone)]
pub struct Process {
    pub(crate) pid: Pid,
    pub(crate) parent: Option<Pid>,
    pub(crate) name: ProcessName,
    pub(crate) state: ProcessState,
    pub(crate) priority: Priority,
    pub(crate) exit_code: Option<i32>,
    pub(crate) context: CpuContext,
    pub(crate) entry_point: usize,
    pub(crate) stack: Option<MemoryRegion>,
    pub(crate) heap: Option<MemoryRegion>,
    pub(crate) time_slice: u32,
    pub(crate) runtime_ticks: u64,
    pub(crate) wake_tick: Option<u64>,
    pub(crate) first_child: Option<Pid>,
    pub(crate) next_sibling: Option<Pid>,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        name: &str,
        entry_point: usize,
        priority: Priority,
        stack: Option<MemoryRegion>,
    ) -> Self {
        // last word of the stack; the stack grows down
        let stack_pointer = stack.map_or(0, |s| s.end() - size_of::<usize>());
        let context = CpuContext::new(
            entry_point,
            stack_pointer,
            KERNEL_CODE_SELECTOR,
            KERNEL_DATA_SELECTOR,
            Eflags::from_bits(INITIAL_EFLAGS),
        );
        Self {
            pid,
            parent: None,
            name: ProcessName::new(name),
            state: ProcessState::Ready,
            priority,
            exit_code: None,
            context,
            entry_point,
            stack,
            heap: None,
            time_slice: DEFAULT_TIME_SLICE,
            runtime_ticks: 0,
            wake_tick: None,
            first_child: None,
            next_sibling: None,
        }
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub const fn parent(&self) -> Option<Pid> {
        self.parent
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Set once the process terminates.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    #[must_use]
    pub const fn context(&self) -> &CpuContext {
        &self.context
    }

    #[must_use]
    pub const fn entry_point(&self) -> usize {
        self.entry_point
    }

    #[must_use]
    pub const fn stack(&self) -> Option<MemoryRegion> {
        self.stack
    }

    #[must_use]
    pub const fn heap(&self) -> Option<MemoryRegion> {
        self.heap
    }

    #[must_use]
    pub const fn time_slice(&self) -> u32 {
        self.time_slice
    }

    /// Timer ticks spent running.
    #[must_use]
    pub const fn runtime_ticks(&self) -> u64 {
        self.runtime_ticks
    }

    /// The tick a sleeping process becomes ready again.
    #[must_use]
    pub const fn wake_tick(&self) -> Option<u64> {
        self.wake_tick
    }

    /// Bytes of kernel memory owned by the process.
    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.stack.map_or(0, |s| s.size) + self.heap.map_or(0, |h| h.size)
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Process Info:")?;
        writeln!(f, "  PID: {}", self.pid)?;
        writeln!(f, "  Name: {}", self.name)?;
        writeln!(f, "  State: {}", self.state)?;
        writeln!(f, "  Priority: {}", self.priority)?;
        match self.stack {
            Some(s) => writeln!(f, "  Stack: {:#010X} ({}KB)", s.base, s.size / 1024)?,
            None => writeln!(f, "  Stack: None")?,
        }
        writeln!(f, "  Entry Point: {:#010X}", self.entry_point)
    }
}
