//! Structured log sink consumed by the device runtime.
//!
//! The logger is an external collaborator: the runtime hands every record to
//! a [`DeviceLog`] and never inspects what the sink does with it. A
//! tracing-backed sink is the default for embedding; [`MemoryLog`] collects
//! records for tests and diagnostics.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity levels accepted by the sink. All four are pass-throughs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Plain log record.
    Log,
    /// Informational record.
    Info,
    /// Warning record.
    Warn,
    /// Error record.
    Error,
}

impl LogLevel {
    /// Wire name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Event-style log sink.
///
/// `subject` scopes the record to its producer (for device records,
/// `{name}-log` or plain `device`); `data` is an optional structured payload
/// such as a transition log record.
pub trait DeviceLog: Send + Sync {
    /// Accept one record. Must not block the caller.
    fn emit(&self, level: LogLevel, subject: &str, message: &str, data: Option<&Value>);
}

/// Default sink forwarding to the `tracing` ecosystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl DeviceLog for TracingLog {
    fn emit(&self, level: LogLevel, subject: &str, message: &str, data: Option<&Value>) {
        match level {
            LogLevel::Log | LogLevel::Info => {
                tracing::info!(subject, data = ?data, "{message}");
            }
            LogLevel::Warn => {
                tracing::warn!(subject, data = ?data, "{message}");
            }
            LogLevel::Error => {
                tracing::error!(subject, data = ?data, "{message}");
            }
        }
    }
}

/// One record captured by [`MemoryLog`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Severity the record was emitted at.
    pub level: LogLevel,
    /// Producer scope.
    pub subject: String,
    /// Human-readable message.
    pub message: String,
    /// Structured payload, when one was attached.
    pub data: Option<Value>,
}

/// Collecting sink for tests and embedded inspection.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record captured so far.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Number of captured records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// True when nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceLog for MemoryLog {
    fn emit(&self, level: LogLevel, subject: &str, message: &str, data: Option<&Value>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                subject: subject.to_string(),
                message: message.to_string(),
                data: data.cloned(),
            });
        }
    }
}
