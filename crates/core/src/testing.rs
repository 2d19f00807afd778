use crate::{Execution, ExecutionId, ExecutionStatus};

/// Live execution with no stored log yet.
pub fn running(id: &str) -> Execution {
    execution(id, ExecutionStatus::Running, None)
}

/// Finished execution whose stored log is `log`.
pub fn finished(id: &str, status: ExecutionStatus, log: &str) -> Execution {
    let mut exec = execution(id, status, Some(log));
    exec.duration_ms = Some(1_500);
    if status == ExecutionStatus::Failed {
        exec.error_message = Some("exit status 1".to_string());
    }
    exec
}

pub fn execution(id: &str, status: ExecutionStatus, log: Option<&str>) -> Execution {
    Execution {
        id: ExecutionId::new(id),
        status,
        started_at: Some(chrono::Utc::now()),
        duration_ms: None,
        error_message: None,
        log: log.map(str::to_string),
    }
}
