//! # QEMU Debug Console
//!
//! Kernel log output through QEMU's debug console, I/O port `0x402`.
//!
//! ```text
//! log::info!(..) ──► QemuLogger ──► qemu_trace! ──► QemuSink ──► port 0x402
//! ```
//!
//! Capture it on the host with `-debugcon stdio` or `-debugcon file:debug.log`.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::LevelFilter;
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().ok();
//! log::info!("PFA: 3584 frames free");
//! ```
//!
//! ## Features
//! - `enabled` (default): writes reach the port on x86 targets. Without it,
//!   and on any other architecture, output is dropped.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's debug console port.
    pub const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to the debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64")))]
        // SAFETY: port 0x402 has no side effects beyond the console.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64"))))]
        let _ = c;
    }

    /// [`fmt::Write`] onto the debug console.
    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // best effort
        let _ = fmt::write(&mut QemuSink, args);
    }
}

/// `print!` onto the debug console, without allocating.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
