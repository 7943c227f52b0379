//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core. The only concurrency is the timer
//! interrupt preempting ordinary control flow, so shared state is protected
//! by disabling interrupts around every mutation ([`IrqGuard`], [`IrqLock`]).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod irq_lock;
mod sync_once_cell;

pub use irq::IrqGuard;
pub use irq_lock::{IrqLock, IrqLockGuard, LockGuard};
pub use sync_once_cell::SyncOnceCell;
