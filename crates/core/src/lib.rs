pub mod api;
pub mod error;
pub mod event;
pub mod execution;
pub mod lifecycle;

pub use error::{Error, Result};
pub use event::LogEvent;
pub use execution::{split_log_lines, Execution, ExecutionId, ExecutionStatus};
pub use lifecycle::{is_live, Lifecycle, Transition};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
