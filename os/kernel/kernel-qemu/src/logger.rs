use crate::qemu_fmt::QemuSink;
use core::fmt;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// [`Log`] sink for the QEMU debug console.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Install as the global logger. Call once during early init.
    ///
    /// # Errors
    /// If another logger is already installed.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }

    /// `"[LEVEL] target: message\n"`
    ///
    /// # Errors
    /// Whatever `out` reports.
    pub fn format_record(out: &mut impl fmt::Write, record: &Record) -> fmt::Result {
        writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = Self::format_record(&mut QemuSink, record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::string::String;

    #[test]
    fn record_format() {
        let mut out = String::new();
        QemuLogger::format_record(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_alloc::heap")
                .args(format_args!("ignoring free of {:#x}", 0xD000_0010_u32))
                .build(),
        )
        .unwrap();
        assert_eq!(out, "[WARN] kernel_alloc::heap: ignoring free of 0xd0000010\n");
    }

    #[test]
    fn filters_by_level() {
        let logger = QemuLogger::new(LevelFilter::Info);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
        assert_eq!(logger.max_level(), LevelFilter::Info);
    }
}
