//! In-memory [`ExecutionFeed`] for exercising sources and the coordinator
//! without a job system.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use execwatch_api_client::LogEventStream;
use execwatch_core::api::LogChunk;
use execwatch_core::{Execution, ExecutionId, ExecutionStatus, LogEvent};

use crate::feed::ExecutionFeed;

type StreamItem = anyhow::Result<LogEvent>;

/// Counts itself in `live` for as long as the subscription stream exists.
struct ConnectionGuard {
    live: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { live }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct State {
    details: HashMap<ExecutionId, Execution>,
    scripted_streams: HashMap<ExecutionId, Vec<StreamItem>>,
    open_streams: HashMap<ExecutionId, mpsc::UnboundedSender<StreamItem>>,
    subscribe_ids: Vec<ExecutionId>,
    subscribe_error: Option<String>,
    polls: VecDeque<anyhow::Result<LogChunk>>,
    poll_cursors: Vec<u64>,
    poll_delay: Option<Duration>,
}

pub(crate) struct FakeFeed {
    push: bool,
    state: Mutex<State>,
    live: Arc<AtomicUsize>,
    detail_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    panic_on_poll: AtomicBool,
}

impl FakeFeed {
    pub(crate) fn new(push: bool) -> Self {
        Self {
            push,
            state: Mutex::new(State::default()),
            live: Arc::new(AtomicUsize::new(0)),
            detail_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            panic_on_poll: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_detail(&self, execution: Execution) {
        self.state().details.insert(execution.id.clone(), execution);
    }

    /// The next subscription for `id` replays `items` and then ends.
    pub(crate) fn script_stream(&self, id: &ExecutionId, items: Vec<StreamItem>) {
        self.state().scripted_streams.insert(id.clone(), items);
    }

    pub(crate) fn fail_subscribe(&self, reason: &str) {
        self.state().subscribe_error = Some(reason.to_string());
    }

    /// Push one item into the open subscription for `id`.
    pub(crate) fn push(&self, id: &ExecutionId, item: StreamItem) {
        let state = self.state();
        let tx = state
            .open_streams
            .get(id)
            .unwrap_or_else(|| panic!("no open subscription for {id}"));
        tx.send(item).unwrap();
    }

    pub(crate) fn push_event(&self, id: &ExecutionId, event: LogEvent) {
        self.push(id, Ok(event));
    }

    /// End the open subscription for `id` from the server side.
    pub(crate) fn hang_up(&self, id: &ExecutionId) {
        self.state().open_streams.remove(id);
    }

    pub(crate) fn script_polls(&self, chunks: Vec<anyhow::Result<LogChunk>>) {
        self.state().polls.extend(chunks);
    }

    pub(crate) fn set_poll_delay(&self, delay: Duration) {
        self.state().poll_delay = Some(delay);
    }

    /// Every later `log_since` call panics.
    pub(crate) fn panic_on_poll(&self) {
        self.panic_on_poll.store(true, Ordering::SeqCst);
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.state().subscribe_ids.len()
    }

    pub(crate) fn subscribe_calls_for(&self, id: &ExecutionId) -> usize {
        self.state()
            .subscribe_ids
            .iter()
            .filter(|subscribed| *subscribed == id)
            .count()
    }

    pub(crate) fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn poll_calls(&self) -> usize {
        self.state().poll_cursors.len()
    }

    pub(crate) fn poll_cursors(&self) -> Vec<u64> {
        self.state().poll_cursors.clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionFeed for FakeFeed {
    async fn execution(&self, id: &ExecutionId) -> anyhow::Result<Execution> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .details
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 Not Found: execution {id}"))
    }

    async fn log_since(&self, _id: &ExecutionId, cursor: u64) -> anyhow::Result<LogChunk> {
        if self.panic_on_poll.load(Ordering::SeqCst) {
            panic!("log_since failed hard at cursor {cursor}");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (delay, next) = {
            let mut state = self.state();
            state.poll_cursors.push(cursor);
            (state.poll_delay, state.polls.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| {
            Ok(LogChunk {
                offset: cursor,
                lines: Vec::new(),
                status: Some(ExecutionStatus::Running),
                finished: false,
            })
        })
    }

    async fn subscribe(&self, id: &ExecutionId) -> anyhow::Result<LogEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state();
            state.subscribe_ids.push(id.clone());
            if let Some(reason) = state.subscribe_error.clone() {
                anyhow::bail!("{reason}");
            }
            match state.scripted_streams.remove(id) {
                Some(items) => {
                    for item in items {
                        let _ = tx.send(item);
                    }
                }
                None => {
                    state.open_streams.insert(id.clone(), tx);
                }
            }
        }

        let guard = ConnectionGuard::new(self.live.clone());
        Ok(stream::unfold((rx, guard), |(mut rx, guard)| async move {
            let item = rx.recv().await?;
            Some((item, (rx, guard)))
        })
        .boxed())
    }

    async fn supports_push(&self) -> bool {
        self.push
    }
}
