//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! The three memory layers of the kernel, bottom-up:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Kernel Heap ([`heap`])              │
//! │    • Segregated free lists, magic-checked headers   │
//! │    • Page-backed large allocations                  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ PageProvider
//! ┌─────────────────▼───────────────────────────────────┐
//! │            Virtual Memory Manager ([`vmm`])         │
//! │    • Two-level page directories                     │
//! │    • Kernel heap window, user stacks and heaps      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ FrameAlloc
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Physical Frame Allocator ([`frame_alloc`])   │
//! │    • One bit per 4 KiB frame, fixed-size bitmap     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Each layer owns the one below: the VMM owns the frame allocator, the
//! heap owns its [`PageProvider`](pages::PageProvider). Nothing here locks;
//! the composition root serializes access.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapFrameAlloc, PmmConfig};
//! use kernel_vmem::FrameAlloc;
//!
//! let mut allocator = BitmapFrameAlloc::new();
//! allocator.init(PmmConfig::default()).unwrap();
//! if let Some(frame) = allocator.alloc_4k() {
//!     allocator.free_4k(frame);
//! }
//! ```
//!
//! ## Features
//! - `strict`: invalid frees panic instead of being logged and ignored.
//! - `hosted`: [`HostPageProvider`](pages::HostPageProvider) and the hosted
//!   halves of `kernel-vmem` and `kernel-registers`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "hosted"))]
extern crate alloc;

pub mod frame_alloc;
pub mod heap;
pub mod large;
pub mod pages;
pub mod phys_mapper;
pub mod vmm;
