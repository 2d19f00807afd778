use std::io::Write;

use anyhow::{Context, Result};

use execwatch_core::ExecutionId;

use crate::config;
use crate::output::print_summary;
use crate::watch::{build_client, retry_config};

/// Print an execution's stored log and summary without tracking it.
pub async fn run_show(id: ExecutionId) -> Result<()> {
    let config = config::load_config()?;
    let api = build_client(&config)?;
    let execution = api
        .get_execution_with_retry(&id, &retry_config(&config))
        .await
        .with_context(|| format!("Failed to fetch execution {id}"))?;

    let mut stdout = std::io::stdout().lock();
    for line in execution.persisted_lines() {
        writeln!(stdout, "{line}")?;
    }
    stdout.flush()?;

    print_summary(&execution);
    if execution.is_live() {
        eprintln!("Execution is still {}; run `execwatch watch {id}` to follow it.", execution.status);
    }
    Ok(())
}
