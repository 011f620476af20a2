//! Log line records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Workload stdout.
    Out,
    /// Workload stderr.
    Err,
    /// Progress message from Vertex itself.
    VertexOut,
    /// Error message from Vertex itself.
    VertexErr,
    /// Image pull or release download progress.
    Download,
}

/// A single log line attached to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    /// Creates a log line stamped with the current time.
    #[must_use]
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
