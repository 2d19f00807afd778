use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, warn};

use execwatch_core::{ExecutionId, LogEvent};

use super::{SourceEvent, SourceSink};
use crate::feed::ExecutionFeed;

/// Forward one push subscription into `sink` until `finished`, error, end of
/// stream, or abort. Never reconnects.
pub(super) async fn run(feed: Arc<dyn ExecutionFeed>, id: ExecutionId, sink: SourceSink) {
    let mut stream = match feed.subscribe(&id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(execution = %id, "push subscription failed: {e:#}");
            sink.emit(SourceEvent::Error(format!("{e:#}")));
            return;
        }
    };

    if !sink.emit(SourceEvent::Opened) {
        return;
    }

    while let Some(item) = stream.next().await {
        match item {
            Ok(LogEvent::Heartbeat) => {}
            Ok(event) => {
                let finished = event.ends_stream();
                if !sink.emit(SourceEvent::Event(event)) {
                    return;
                }
                if finished {
                    debug!(execution = %id, "push stream finished");
                    return;
                }
            }
            Err(e) => {
                warn!(execution = %id, "push stream dropped: {e:#}");
                sink.emit(SourceEvent::Error(format!("{e:#}")));
                return;
            }
        }
    }

    debug!(execution = %id, "push stream ended without finished event");
    sink.emit(SourceEvent::Closed);
}
