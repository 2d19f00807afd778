use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use execwatch_core::{ExecutionId, ExecutionStatus, LogEvent};

use super::{SourceEvent, SourceSink};
use crate::feed::ExecutionFeed;

/// Poll `log_since` every `interval` and forward new lines, status changes
/// and completion into `sink`.
///
/// Requests are awaited inline and missed ticks are skipped, so at most one
/// request is in flight per session no matter how slow the server is.
pub(super) async fn run(
    feed: Arc<dyn ExecutionFeed>,
    id: ExecutionId,
    interval: Duration,
    sink: SourceSink,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut cursor = 0u64;
    let mut last_status: Option<ExecutionStatus> = None;
    let mut opened = false;

    loop {
        ticker.tick().await;

        let chunk = match feed.log_since(&id, cursor).await {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(execution = %id, cursor, "log poll failed: {e:#}");
                sink.emit(SourceEvent::Error(format!("{e:#}")));
                return;
            }
        };

        if !opened {
            opened = true;
            if !sink.emit(SourceEvent::Opened) {
                return;
            }
        }

        let fresh = chunk.lines_from(cursor);
        if !fresh.is_empty() {
            debug!(execution = %id, cursor, count = fresh.len(), "polled new log lines");
        }
        for line in fresh {
            if !sink.emit(SourceEvent::Event(LogEvent::line(line.clone()))) {
                return;
            }
        }
        cursor = cursor.max(chunk.end());

        if let Some(status) = chunk.status {
            if last_status != Some(status) {
                last_status = Some(status);
                if !sink.emit(SourceEvent::Event(LogEvent::status(status))) {
                    return;
                }
            }
        }

        if chunk.is_final() {
            debug!(execution = %id, "poll loop finished");
            sink.emit(SourceEvent::Event(LogEvent::Finished));
            return;
        }
    }
}
