//! # Kernel
//!
//! Composition root for the memory and process core. [`Kernel::boot`]
//! brings the layers up in dependency order:
//!
//! 1. the physical frame allocator,
//! 2. the virtual memory manager, which turns paging on,
//! 3. the kernel heap, fed with pages from the VMM's heap window,
//! 4. the scheduler, with the idle process running.
//!
//! [`Kernel`] then offers the `kmalloc` family and the process calls.
//! [`SharedKernel`] wraps it in an interrupt-disabling lock and owns the
//! timer tick path. On 32-bit x86 the [`global`] module holds the singleton.
//!
//! ```rust,ignore
//! use kernel::{Kernel, KernelConfig};
//! use kernel_alloc::pages::HostPageProvider;
//! use kernel_proc::Priority;
//! use kernel_registers::HostedPlatform;
//! use kernel_vmem::ArenaPhysMapper;
//!
//! let mapper = ArenaPhysMapper::new(16 * 1024 * 1024);
//! let platform = HostedPlatform::new();
//! let mut kernel =
//!     Kernel::boot(KernelConfig::default(), &mapper, &platform, HostPageProvider::new())?;
//!
//! let buf = kernel.kmalloc(128).unwrap();
//! let shell = kernel.create_process("shell", 0x0040_0000, Priority::Normal)?;
//! assert_eq!(kernel.schedule().next, shell);
//! kernel.kfree(buf);
//! ```
//!
//! ## Features
//! - `qemu` (default): log output goes to the QEMU debug console.
//! - `hosted`: the host-backed doubles of the lower crates, and
//!   [`HeapPages`] for `HostPageProvider`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod config;
#[cfg(target_arch = "x86")]
pub mod global;
mod kernel;
mod memory;
mod shared;

pub use config::{KernelConfig, ms_to_ticks};
pub use kernel::{Kernel, KernelHeap, KernelInitError};
pub use memory::{HeapPages, HeapWindow, KernelMemory, MemoryReport};
pub use shared::SharedKernel;
