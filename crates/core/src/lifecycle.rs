//! Execution lifecycle: `pending -> running -> {success, failed, cancelled}`.
//!
//! Transitions are driven from outside (detail fetches, status events on the
//! live stream). This module only validates and stores them. Anything that
//! would move an execution backwards is treated as a stale or duplicated
//! event and ignored.

use tracing::debug;

use crate::execution::ExecutionStatus;

/// Live means still able to produce output. Every tracking decision keys off
/// this predicate.
pub fn is_live(status: ExecutionStatus) -> bool {
    status.is_live()
}

/// Result of feeding a status into a [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Advanced {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    /// Rejected: the current status is already at or past `rejected`.
    Stale {
        current: ExecutionStatus,
        rejected: ExecutionStatus,
    },
}

impl Transition {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }

    /// True when this transition moved the execution into a terminal state.
    pub fn reached_terminal(&self) -> bool {
        matches!(self, Self::Advanced { to, .. } if to.is_terminal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    status: ExecutionStatus,
}

impl Lifecycle {
    pub fn new(status: ExecutionStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        is_live(self.status)
    }

    pub fn apply(&mut self, next: ExecutionStatus) -> Transition {
        if next == self.status {
            return Transition::Unchanged;
        }
        if rank(next) <= rank(self.status) {
            debug!(
                current = %self.status,
                rejected = %next,
                "ignoring stale execution status"
            );
            return Transition::Stale {
                current: self.status,
                rejected: next,
            };
        }
        let from = self.status;
        self.status = next;
        Transition::Advanced { from, to: next }
    }
}

fn rank(status: ExecutionStatus) -> u8 {
    match status {
        ExecutionStatus::Pending => 0,
        ExecutionStatus::Running => 1,
        ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled => 2,
    }
}
