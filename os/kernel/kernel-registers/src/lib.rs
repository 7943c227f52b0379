//! # Typed x86 (32-bit) Registers and the Platform Boundary
//!
//! Bitfield models of the control registers the memory manager touches
//! ([`Cr0`](cr0::Cr0), [`Cr3`](cr3::Cr3), [`Eflags`](eflags::Eflags)), the saved
//! [`CpuContext`] of a suspended process, and the [`Platform`] trait that
//! isolates every privileged instruction from allocator and scheduler logic.
//!
//! With the `asm` feature on a `target_arch = "x86"` build, [`X86Platform`]
//! implements the trait with inline assembly. The `hosted` feature provides
//! [`HostedPlatform`], which records calls so the rest of the kernel can be
//! tested as an ordinary host program.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "hosted"))]
extern crate alloc;

pub mod context;
pub mod cr0;
pub mod cr3;
pub mod eflags;
mod platform;

#[cfg(any(test, feature = "hosted"))]
mod hosted;

#[cfg(all(feature = "asm", target_arch = "x86"))]
mod x86;

pub use context::CpuContext;
pub use platform::Platform;

#[cfg(any(test, feature = "hosted"))]
pub use hosted::{HostedPlatform, SwitchRecord};

#[cfg(all(feature = "asm", target_arch = "x86"))]
pub use x86::X86Platform;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}
