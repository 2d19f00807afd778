use execwatch_core::{Execution, ExecutionStatus};
use execwatch_live::ConnectionState;

pub fn format_duration_ms(ms: u64) -> String {
    let seconds = ms / 1000;
    if seconds < 60 {
        format!("{}.{}s", seconds, (ms % 1000) / 100)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

fn status_color(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "\x1b[2m",
        ExecutionStatus::Running => "\x1b[36m",
        ExecutionStatus::Success => "\x1b[32m",
        ExecutionStatus::Failed => "\x1b[31m",
        ExecutionStatus::Cancelled => "\x1b[33m",
    }
}

pub fn status_badge(status: ExecutionStatus) -> String {
    format!("{}[{}]\x1b[0m", status_color(status), status)
}

/// One-line transport indicator written to stderr.
pub fn connection_badge(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected(reason) => {
            format!("\x1b[31m● {}\x1b[0m ({reason})", state.badge())
        }
        ConnectionState::Streaming => format!("\x1b[32m● {}\x1b[0m", state.badge()),
        other => format!("\x1b[2m○ {}\x1b[0m", other.badge()),
    }
}

pub fn print_summary(execution: &Execution) {
    let duration = execution
        .duration_ms
        .map(format_duration_ms)
        .unwrap_or_else(|| "-".to_string());
    eprintln!(
        "\x1b[33m{}\x1b[0m {} {duration}",
        execution.id,
        status_badge(execution.status)
    );
    if let Some(started) = execution.started_at {
        eprintln!("    \x1b[2mstarted {}\x1b[0m", started.to_rfc3339());
    }
    if let Some(error) = execution.error_message.as_deref() {
        eprintln!("    error: {error}");
    }
}
