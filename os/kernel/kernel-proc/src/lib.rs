//! # Processes and Scheduling
//!
//! Process control blocks in a fixed-capacity table indexed by pid, an
//! intrusive FIFO run queue, and a preemptive round-robin [`Scheduler`].
//!
//! The crate never touches the CPU. Stacks come from a [`ProcessMemory`]
//! (the kernel heap), and context switches are described by
//! [`ContextSwitch`] values for the caller to carry out.
//!
//! ```rust
//! use kernel_alloc::heap::{Heap, HeapConfig};
//! use kernel_alloc::pages::HostPageProvider;
//! use kernel_proc::{Priority, Scheduler};
//!
//! let mut heap = Heap::new(HostPageProvider::new());
//! heap.init(HeapConfig::default()).unwrap();
//!
//! let mut scheduler: Scheduler = Scheduler::new();
//! let shell = scheduler.create(&mut heap, "shell", 0x0010_2000, Priority::Normal).unwrap();
//! assert_eq!(scheduler.schedule().next, shell);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod memory;
mod pid;
mod process;
mod run_queue;
mod scheduler;
mod state;
mod table;

pub use memory::ProcessMemory;
pub use pid::Pid;
pub use process::{MemoryRegion, Process, ProcessName};
pub use run_queue::RunQueue;
pub use scheduler::{
    ContextSwitch, IDLE_NAME, KILLED_EXIT_CODE, SIGKILL, ScheduleOutcome, Scheduler,
};
pub use state::{Priority, ProcessState};
pub use table::ProcessTable;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("process table is full")]
    TableFull,
    #[error("out of memory for a process stack or heap")]
    OutOfMemory,
    #[error("no process with pid {0}")]
    NotFound(Pid),
    #[error("pid {0} is protected")]
    Protected(Pid),
    #[error("operation not valid in state {0}")]
    InvalidState(ProcessState),
    #[error("pid {0} is still executing")]
    Active(Pid),
    #[error("no child processes")]
    NoChildren,
    #[error("no process is running")]
    NoCurrentProcess,
}
