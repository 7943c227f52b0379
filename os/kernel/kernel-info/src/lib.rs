//! # Kernel Configuration
//!
//! Memory layout constants and kernel tunables shared by the frame allocator,
//! the virtual memory manager, the heap and the scheduler. Everything here is a
//! `const`; invalid combinations are rejected at compile time.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (32-bit, two-level paging):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Identity map of low 4 MiB      │
//! 0x0804_8000 ├─────────────────────────────────┤ USER_CODE_BASE
//!             │  User code                      │
//! 0x1000_0000 ├─────────────────────────────────┤ USER_HEAP_START
//!             │  User heap                      │
//! 0x4000_0000 ├─────────────────────────────────┤ USER_HEAP_END
//!             │  ...                            │
//! 0xBFEF_F000 ├─────────────────────────────────┤
//!             │  User stack (grows down)        │
//! 0xBFFF_F000 ├─────────────────────────────────┤ USER_STACK_TOP
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_VIRTUAL_BASE
//!             │  Higher-half direct map         │
//! 0xD000_0000 ├─────────────────────────────────┤ KERNEL_HEAP_START
//!             │  Kernel page allocations        │
//! 0xE000_0000 ├─────────────────────────────────┤ KERNEL_HEAP_END
//!             │  Unused                         │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Page-directory slots 768..1024 cover kernel space. Every user directory
//! copies them from the kernel directory, so all address spaces share one
//! kernel mapping.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Low memory (BIOS, VGA)         │
//! 0x0010_0000 ├─────────────────────────────────┤ PHYS_MEMORY_START, KERNEL_IMAGE_START
//!             │  Kernel image                   │
//! 0x0020_0000 ├─────────────────────────────────┤ KERNEL_IMAGE_END
//!             │  Frames managed by the PFA      │
//! 0x0100_0000 └─────────────────────────────────┘ PHYS_MEMORY_END
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod process;
