use serde::{Deserialize, Serialize};

use crate::execution::ExecutionStatus;

/// Normalized event delivered by a live log source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    Line { text: String },
    Status { status: ExecutionStatus },
    Finished,
    /// Transport keep-alive. Never buffered.
    Heartbeat,
}

impl LogEvent {
    pub fn line(text: impl Into<String>) -> Self {
        Self::Line { text: text.into() }
    }

    pub fn status(status: ExecutionStatus) -> Self {
        Self::Status { status }
    }

    /// Decode one wire payload.
    ///
    /// Empty, malformed, or unknown payloads decode to [`LogEvent::Heartbeat`]
    /// so parse noise on chatty transports is dropped instead of raised.
    pub fn decode(payload: &str) -> Self {
        let payload = payload.trim();
        if payload.is_empty() {
            return Self::Heartbeat;
        }
        serde_json::from_str(payload).unwrap_or(Self::Heartbeat)
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }

    pub fn ends_stream(&self) -> bool {
        matches!(self, Self::Finished)
    }
}
