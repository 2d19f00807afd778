//! Request/response shapes of the job system endpoints this crate consumes.
//!
//! `Execution` (the detail endpoint body) lives in [`crate::execution`];
//! everything else is here.

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionStatus;

/// Body of `GET /api/executions/{id}/log?cursor=N`.
///
/// `offset` is the index of `lines[0]` within the full log. Servers that only
/// support full-log responses answer with `offset = 0` regardless of the
/// requested cursor; clients skip what they have already seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogChunk {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub finished: bool,
}

impl LogChunk {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.lines.len() as u64)
    }

    /// Lines at or after `cursor`, in order.
    pub fn lines_from(&self, cursor: u64) -> &[String] {
        let skip = cursor.saturating_sub(self.offset);
        let skip = usize::try_from(skip)
            .unwrap_or(usize::MAX)
            .min(self.lines.len());
        &self.lines[skip..]
    }

    /// No more lines will follow this chunk.
    pub fn is_final(&self) -> bool {
        self.finished || self.status.is_some_and(ExecutionStatus::is_terminal)
    }
}

/// Body of `GET /api/capabilities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    /// Server can push events over `GET /api/executions/{id}/events`.
    #[serde(default)]
    pub live_push: bool,
}
