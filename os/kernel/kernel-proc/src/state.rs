//! Process lifecycle and priority.
//!
//! ```text
//!   create ──► Ready ◄──────────── wake / deadline
//!               │  ▲                     │
//!      schedule │  │ preempt             │
//!               ▼  │                     │
//!             Running ──── sleep ──► Blocked
//!               │
//!               │ exit / kill
//!               ▼
//!           Terminated  (absorbing)
//! ```

use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Waiting in the run queue.
    Ready,
    /// Executing. Assigned by the scheduler only.
    Running,
    /// Sleeping or waiting for an explicit wake.
    Blocked,
    /// Finished; the slot is held until the parent reaps it.
    Terminated,
}

impl ProcessState {
    /// Whether `set_state` may move a process into this state.
    #[must_use]
    pub const fn is_settable(self) -> bool {
        !matches!(self, Self::Running)
    }

    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Blocked => "BLOCKED",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Scheduling hint. The run queue is strict FIFO; priority is recorded and
/// shown but does not reorder anything.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_is_scheduler_only() {
        assert!(ProcessState::Ready.is_settable());
        assert!(ProcessState::Blocked.is_settable());
        assert!(ProcessState::Terminated.is_settable());
        assert!(!ProcessState::Running.is_settable());
    }

    #[test]
    fn names_pad_for_listings() {
        assert_eq!(std::format!("{:<8}|", ProcessState::Ready), "READY   |");
        assert_eq!(std::format!("{}", Priority::Low), "LOW");
    }
}
