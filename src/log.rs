//! Session transcript: ordered, replayable log records.
//!
//! Every record goes to one or more [`LogBuffer`] sinks and is mirrored
//! to `tracing` for live console output. A command run that should show
//! up in the session transcript gets a [`Logger`] with two sinks (its own
//! buffer plus the session's); a hidden run gets only its own buffer.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Severity of a log record.
///
/// `Stdout` and `Stderr` are synthetic levels for captured process output.
/// They sort below `Debug` but are always recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Stdout,
    Stderr,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Stdout => "STDOUT",
            Level::Stderr => "STDERR",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logged event. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level,
            self.message
        )
    }
}

/// Append-only record buffer. Clones share the same underlying storage.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: LogRecord) {
        self.records.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// All records formatted one per line.
    pub fn all_records(&self) -> String {
        self.records
            .lock()
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Captured standard output, one line per record.
    pub fn stdout(&self) -> String {
        self.messages_at(Level::Stdout)
    }

    /// Captured standard error, one line per record.
    pub fn stderr(&self) -> String {
        self.messages_at(Level::Stderr)
    }

    fn messages_at(&self, level: Level) -> String {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// True if both handles point at the same storage.
    pub fn same_buffer(&self, other: &LogBuffer) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }
}

/// Logger writing into an ordered set of sinks.
#[derive(Debug, Clone)]
pub struct Logger {
    sinks: Vec<LogBuffer>,
}

impl Logger {
    /// A logger with a single private buffer.
    pub fn new() -> Self {
        Self {
            sinks: vec![LogBuffer::new()],
        }
    }

    /// A logger with its own buffer that also appends into `master`'s
    /// primary buffer.
    pub fn with_master(master: &Logger) -> Self {
        Self {
            sinks: vec![LogBuffer::new(), master.buffer().clone()],
        }
    }

    /// The logger's own buffer (always the first sink).
    pub fn buffer(&self) -> &LogBuffer {
        &self.sinks[0]
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        let record = LogRecord::new(level, message);
        mirror(&record);
        for sink in &self.sinks {
            sink.push(record.clone());
        }
    }

    pub fn stdout(&self, message: impl Into<String>) {
        self.log(Level::Stdout, message);
    }

    pub fn stderr(&self, message: impl Into<String>) {
        self.log(Level::Stderr, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Level::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.log(Level::Critical, message);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

fn mirror(record: &LogRecord) {
    let msg = record.message.as_str();
    match record.level {
        Level::Stdout => tracing::info!(stream = "stdout", "{msg}"),
        Level::Stderr => tracing::info!(stream = "stderr", "{msg}"),
        Level::Debug => tracing::debug!("{msg}"),
        Level::Info => tracing::info!("{msg}"),
        Level::Warning => tracing::warn!("{msg}"),
        Level::Error => tracing::error!("{msg}"),
        Level::Critical => tracing::error!(critical = true, "{msg}"),
    }
}
