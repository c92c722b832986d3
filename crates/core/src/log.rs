//! Job log lines pushed alongside progress.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Severity of a job log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl LogLevel {
    /// Fixed-width label for terminal output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// A single log line for the active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Log payload as sent by the server; the timestamp may be omitted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogPayload {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

impl LogPayload {
    /// Convert into an entry, stamping with `received_at` when the server
    /// sent no timestamp.
    pub fn into_entry(self, received_at: Timestamp) -> LogEntry {
        LogEntry {
            timestamp: self.timestamp.unwrap_or(received_at),
            level: self.level,
            message: self.message,
        }
    }
}
