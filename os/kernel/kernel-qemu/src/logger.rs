use crate::DebugSink;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

fn boot_core() -> usize {
    0
}

pub struct QemuLogger {
    sink: &'static dyn DebugSink,
    max_level: LevelFilter,
    core_id: fn() -> usize,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(sink: &'static dyn DebugSink, max_level: LevelFilter) -> Self {
        Self {
            sink,
            max_level,
            core_id: boot_core,
        }
    }

    /// Report the calling core through `core_id` instead of always core 0.
    #[must_use]
    pub const fn with_core_source(mut self, core_id: fn() -> usize) -> Self {
        self.core_id = core_id;
        self
    }

    /// Call this once during early init.
    #[allow(static_mut_refs, clippy::missing_errors_doc)]
    pub fn init(self) -> Result<(), SetLoggerError> {
        // log::set_logger wants a &'static dyn Log and there is no heap yet.
        static mut LOGGER: Option<QemuLogger> = None;

        let max_level = self.max_level;
        // SAFETY: runs once on the boot core before any other core or
        // interrupt can log; set_logger rejects a second installation.
        let logger = unsafe { LOGGER.insert(self) };
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

/// Adapts a sink to `core::fmt::Write`.
struct Lines<'a>(&'a dyn DebugSink);

impl Write for Lines<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
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

        // Format: "[LEVEL] cpuN target: message\n"
        let _ = writeln!(
            Lines(self.sink),
            "[{}] cpu{} {}: {}",
            record.level(),
            (self.core_id)(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // The sinks are unbuffered.
    }
}
