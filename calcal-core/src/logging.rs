//! Injected stage logger.
//!
//! Stages never write to the process-wide logger implicitly. Each receives a
//! [`StageLog`] naming the sink and the target its records are tagged with.

use log::{Level, Log, Record};
use std::fmt;

/// Logging handle passed explicitly into every calibration stage.
#[derive(Clone, Copy)]
pub struct StageLog<'a> {
    logger: &'a dyn Log,
    target: &'a str,
}

impl<'a> StageLog<'a> {
    /// Logs through `logger` with the given target.
    #[must_use]
    pub fn new(logger: &'a dyn Log, target: &'a str) -> Self {
        Self { logger, target }
    }

    /// Returns the same sink with a different target.
    #[must_use]
    pub fn with_target(self, target: &'a str) -> Self {
        Self { target, ..self }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        self.target
    }

    /// Emits one record if the sink accepts its level.
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .args(args)
            .level(level)
            .target(self.target)
            .build();
        if self.logger.enabled(record.metadata()) {
            self.logger.log(&record);
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }
}

impl StageLog<'static> {
    /// Binds to the logger installed with the `log` crate.
    #[must_use]
    pub fn global(target: &'static str) -> Self {
        Self::new(log::logger(), target)
    }
}

impl fmt::Debug for StageLog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageLog")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A logger that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingLog {
    records: std::sync::Mutex<Vec<(Level, String)>>,
}

impl RecordingLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured `(level, message)` pairs.
    #[must_use]
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of captured records at `level`.
    #[must_use]
    pub fn count(&self, level: Level) -> usize {
        self.records().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Log for RecordingLog {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}
