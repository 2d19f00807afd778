//! Log source client: one push subscription or poll loop per tracked
//! execution, behind a single handle type.
//!
//! Only the coordinator can open or close a handle; the constructors and
//! `open`/`close` are crate-private.

mod poll;
mod push;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use execwatch_core::{ExecutionId, LogEvent};

use crate::coordinator::{Envelope, Payload};
use crate::feed::ExecutionFeed;

/// What a running source reports to its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Subscription established / first poll answered.
    Opened,
    Event(LogEvent),
    /// Transport failed. The source has closed itself.
    Error(String),
    /// Server ended the push stream without a `finished` event.
    Closed,
}

/// Acquisition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Push,
    Poll { interval: Duration },
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll { .. } => "poll",
        }
    }

    /// Run the transport on its own task. A panic inside it is reported to
    /// the sink as an error instead of ending the task silently.
    fn spawn(
        self,
        feed: Arc<dyn ExecutionFeed>,
        id: ExecutionId,
        sink: SourceSink,
    ) -> JoinHandle<()> {
        let reporter = sink.clone();
        let execution = id.clone();
        let run: BoxFuture<'static, ()> = match self {
            Self::Push => push::run(feed, id, sink).boxed(),
            Self::Poll { interval } => poll::run(feed, id, interval, sink).boxed(),
        };
        tokio::spawn(async move {
            if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                warn!(execution = %execution, "log source task panicked");
                reporter.emit(SourceEvent::Error(
                    "log source stopped unexpectedly".to_string(),
                ));
            }
        })
    }
}

/// Generation-tagged sender. Messages from a superseded session carry an old
/// generation and are dropped by the coordinator.
#[derive(Clone)]
pub(crate) struct SourceSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl SourceSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// Returns false once the receiving side is gone.
    pub(crate) fn emit(&self, event: SourceEvent) -> bool {
        self.tx
            .send(Envelope {
                generation: self.generation,
                payload: Payload::Source(event),
            })
            .is_ok()
    }
}

enum HandleState {
    Idle,
    Open(JoinHandle<()>),
    Closed,
}

/// One transport resource for one execution.
///
/// `open` is idempotent and `close` is synchronous: the backing task is
/// aborted before `close` returns. Closed handles are never reopened.
pub struct SourceHandle {
    execution_id: ExecutionId,
    transport: Transport,
    state: HandleState,
}

impl SourceHandle {
    pub(crate) fn new(execution_id: ExecutionId, transport: Transport) -> Self {
        Self {
            execution_id,
            transport,
            state: HandleState::Idle,
        }
    }

    /// Start the transport. Returns false (and does nothing) when the handle
    /// is already open or has been closed.
    pub(crate) fn open(&mut self, feed: Arc<dyn ExecutionFeed>, sink: SourceSink) -> bool {
        match self.state {
            HandleState::Idle => {
                debug!(
                    execution = %self.execution_id,
                    transport = self.transport.name(),
                    "opening log source"
                );
                let task = self
                    .transport
                    .spawn(feed, self.execution_id.clone(), sink);
                self.state = HandleState::Open(task);
                true
            }
            HandleState::Open(_) => false,
            HandleState::Closed => {
                debug!(execution = %self.execution_id, "ignoring open on closed log source");
                false
            }
        }
    }

    pub(crate) fn close(&mut self) {
        if let HandleState::Open(task) = std::mem::replace(&mut self.state, HandleState::Closed) {
            task.abort();
            debug!(execution = %self.execution_id, "closed log source");
        }
    }

    /// True while the transport task is alive. A source that delivered
    /// `finished` or hit an error reports false even before `close`.
    pub fn is_open(&self) -> bool {
        matches!(&self.state, HandleState::Open(task) if !task.is_finished())
    }

    /// Resolves once the transport task has exited, however it ended.
    /// Pends forever on a handle that is not running.
    pub(crate) async fn exited(&mut self) {
        match &mut self.state {
            HandleState::Open(task) => {
                let _ = task.await;
            }
            _ => std::future::pending::<()>().await,
        }
        self.state = HandleState::Closed;
    }

    /// Kill the task without telling anyone, as a crashed transport would.
    #[cfg(test)]
    pub(crate) fn kill_silently(&self) {
        if let HandleState::Open(task) = &self.state {
            task.abort();
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.close();
    }
}
