//! The single owner of "what is currently being tracked".
//!
//! A [`TrackingCoordinator`] belongs to one UI surface. It holds at most one
//! [`TrackingSession`]; switching targets always closes the previous
//! session's transport before anything is opened for the next one. All
//! network work happens in spawned tasks that report back through one
//! channel, and all session state is mutated on the consumer side in
//! [`TrackingCoordinator::pump`] / [`TrackingCoordinator::recv`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use execwatch_core::{Execution, ExecutionId, ExecutionStatus, Lifecycle, LogEvent, Transition};
use execwatch_runtime_config::{TrackingSettings, TransportPreference};

use crate::buffer::PresentationBuffer;
use crate::feed::ExecutionFeed;
use crate::source::{SourceEvent, SourceHandle, SourceSink, Transport};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub transport: TransportPreference,
    pub poll_interval: Duration,
    /// Follow mode every new session starts with.
    pub follow: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            transport: TransportPreference::Auto,
            poll_interval: Duration::from_secs(1),
            follow: true,
        }
    }
}

impl From<&TrackingSettings> for CoordinatorOptions {
    fn from(settings: &TrackingSettings) -> Self {
        Self {
            transport: settings.transport,
            poll_interval: settings.poll_interval(),
            follow: settings.follow,
        }
    }
}

/// Transport indicator for badge rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Fetching execution detail.
    Loading,
    Connecting,
    Streaming,
    /// Execution is terminal; transport closed, buffer kept.
    Finished,
    /// Transport failed; buffer kept. Retry by calling `track` again.
    Disconnected(String),
}

impl ConnectionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    pub fn badge(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Connecting => "connecting",
            Self::Streaming => "live",
            Self::Finished => "finished",
            Self::Disconnected(_) => "disconnected",
        }
    }
}

/// Where a session's lines come from. The two never mix in one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Detail not fetched yet.
    Unknown,
    /// Seeded from the stored log; the execution was terminal when tracked.
    Persisted,
    /// Filled only from live `line` events.
    Streamed,
}

/// What changed, for the UI to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerUpdate {
    Loaded {
        execution: Execution,
        transport: Option<Transport>,
    },
    LoadFailed(String),
    Connected,
    LinesAppended {
        count: usize,
        scroll_to_end: bool,
    },
    StatusChanged(ExecutionStatus),
    Finished,
    Disconnected(String),
    /// Post-finish or post-error detail refresh. Never touches the buffer.
    Reconciled(Execution),
}

pub(crate) struct Envelope {
    pub(crate) generation: u64,
    pub(crate) payload: Payload,
}

pub(crate) enum Payload {
    Loaded {
        execution: Execution,
        transport: Option<Transport>,
        push_supported: Option<bool>,
    },
    LoadFailed(String),
    Reconciled(Result<Execution, String>),
    Source(SourceEvent),
}

pub struct TrackingSession {
    generation: u64,
    execution_id: ExecutionId,
    detail: Option<Execution>,
    lifecycle: Option<Lifecycle>,
    provenance: Provenance,
    connection: ConnectionState,
    buffer: PresentationBuffer,
    handle: Option<SourceHandle>,
    transport: Option<Transport>,
    fetch: Option<JoinHandle<()>>,
}

impl TrackingSession {
    fn new(generation: u64, execution_id: ExecutionId, follow: bool) -> Self {
        Self {
            generation,
            execution_id,
            detail: None,
            lifecycle: None,
            provenance: Provenance::Unknown,
            connection: ConnectionState::Loading,
            buffer: PresentationBuffer::new(follow),
            handle: None,
            transport: None,
            fetch: None,
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn detail(&self) -> Option<&Execution> {
        self.detail.as_ref()
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.lifecycle.as_ref().map(Lifecycle::status)
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn is_streaming(&self) -> bool {
        self.connection.is_streaming()
    }

    pub fn transport(&self) -> Option<Transport> {
        self.transport
    }

    pub fn buffer(&self) -> &PresentationBuffer {
        &self.buffer
    }

    fn has_open_handle(&self) -> bool {
        self.handle.as_ref().is_some_and(SourceHandle::is_open)
    }

    /// Buffer-preserving half of untrack.
    fn close_transport(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    fn replace_fetch(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.fetch.replace(task) {
            previous.abort();
        }
    }

    fn shutdown(&mut self) {
        self.close_transport();
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct TrackingCoordinator {
    feed: Arc<dyn ExecutionFeed>,
    options: CoordinatorOptions,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    generation: u64,
    push_supported: Option<bool>,
    session: Option<TrackingSession>,
}

impl TrackingCoordinator {
    pub fn new(feed: Arc<dyn ExecutionFeed>, options: CoordinatorOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            feed,
            options,
            tx,
            rx,
            generation: 0,
            push_supported: None,
            session: None,
        }
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    // ── Tracking ──────────────────────────────────────────────────────────

    /// Start tracking `id`, replacing whatever was tracked before.
    ///
    /// Must be called inside a tokio runtime. Returns immediately; progress
    /// arrives through [`pump`](Self::pump) / [`recv`](Self::recv).
    /// Re-tracking the execution that is already loading or streaming is a
    /// no-op; re-tracking a finished or disconnected one starts over.
    pub fn track(&mut self, id: ExecutionId) {
        if let Some(session) = &self.session {
            let in_progress = matches!(
                session.connection,
                ConnectionState::Loading
                    | ConnectionState::Connecting
                    | ConnectionState::Streaming
            );
            if session.execution_id == id && in_progress {
                debug!(execution = %id, "already tracking");
                return;
            }
        }

        self.untrack();

        self.generation += 1;
        let generation = self.generation;
        info!(execution = %id, generation, "tracking execution");

        let mut session = TrackingSession::new(generation, id.clone(), self.options.follow);
        session.replace_fetch(tokio::spawn(load(
            self.feed.clone(),
            id,
            self.options.transport,
            self.options.poll_interval,
            self.push_supported,
            generation,
            self.tx.clone(),
        )));
        self.session = Some(session);
    }

    /// Close the transport and discard the session with its buffer.
    /// Safe to call when nothing is tracked.
    pub fn untrack(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!(execution = %session.execution_id, "untracking execution");
            session.shutdown();
        }
    }

    // ── Event intake ──────────────────────────────────────────────────────

    /// Apply everything that has arrived so far without waiting.
    pub fn pump(&mut self) -> Vec<TrackerUpdate> {
        let mut updates = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            self.apply(envelope, &mut updates);
        }
        self.reap_stopped_source(&mut updates);
        coalesce(updates)
    }

    /// Wait for the next message (or for the transport task to stop), then
    /// apply it and anything queued behind it. Pends forever while nothing
    /// is tracked.
    pub async fn recv(&mut self) -> Vec<TrackerUpdate> {
        let mut updates = Vec::new();
        let handle = self
            .session
            .as_mut()
            .and_then(|session| session.handle.as_mut());
        let next = tokio::select! {
            envelope = self.rx.recv() => envelope,
            () = source_exited(handle) => None,
        };
        if let Some(envelope) = next {
            self.apply(envelope, &mut updates);
        }
        while let Ok(envelope) = self.rx.try_recv() {
            self.apply(envelope, &mut updates);
        }
        self.reap_stopped_source(&mut updates);
        coalesce(updates)
    }

    /// A transport task that ended without a closing message still has to
    /// surface as a disconnect.
    fn reap_stopped_source(&mut self, updates: &mut Vec<TrackerUpdate>) {
        fn stopped(session: Option<&TrackingSession>) -> bool {
            session.is_some_and(|session| {
                session.is_streaming() && session.handle.is_some() && !session.has_open_handle()
            })
        }

        if !stopped(self.session.as_ref()) {
            return;
        }
        // Anything the task sent before it ended is already queued.
        while let Ok(envelope) = self.rx.try_recv() {
            self.apply(envelope, updates);
        }
        if stopped(self.session.as_ref()) {
            self.disconnect("log source stopped unexpectedly".to_string(), updates);
        }
    }

    fn apply(&mut self, envelope: Envelope, updates: &mut Vec<TrackerUpdate>) {
        if let Payload::Loaded {
            push_supported: Some(push),
            ..
        } = &envelope.payload
        {
            self.push_supported = Some(*push);
        }

        let Some(session) = self.session.as_mut() else {
            debug!(generation = envelope.generation, "dropping message, nothing tracked");
            return;
        };
        if session.generation != envelope.generation {
            debug!(
                generation = envelope.generation,
                current = session.generation,
                "dropping message from superseded session"
            );
            return;
        }

        match envelope.payload {
            Payload::Loaded {
                execution,
                transport,
                ..
            } => self.on_loaded(execution, transport, updates),
            Payload::LoadFailed(reason) => {
                warn!(execution = %session.execution_id, "execution detail fetch failed: {reason}");
                session.connection = ConnectionState::Disconnected(reason.clone());
                updates.push(TrackerUpdate::LoadFailed(reason));
            }
            Payload::Reconciled(result) => self.on_reconciled(result, updates),
            Payload::Source(event) => self.on_source(event, updates),
        }
    }

    fn on_loaded(
        &mut self,
        execution: Execution,
        transport: Option<Transport>,
        updates: &mut Vec<TrackerUpdate>,
    ) {
        let feed = self.feed.clone();
        let tx = self.tx.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.lifecycle = Some(Lifecycle::new(execution.status));
        session.detail = Some(execution.clone());

        match transport.filter(|_| execution.is_live()) {
            None => {
                // Terminal when tracked: the stored log is the whole story.
                session.provenance = Provenance::Persisted;
                session.connection = ConnectionState::Finished;
                let lines = execution.persisted_lines();
                let count = lines.len();
                let scroll_to_end = session.buffer.extend(lines);
                debug!(execution = %session.execution_id, count, "seeded from persisted log");
                updates.push(TrackerUpdate::Loaded {
                    execution,
                    transport: None,
                });
                if count > 0 {
                    updates.push(TrackerUpdate::LinesAppended {
                        count,
                        scroll_to_end,
                    });
                }
            }
            Some(transport) => {
                session.provenance = Provenance::Streamed;
                session.connection = ConnectionState::Connecting;
                session.transport = Some(transport);
                let mut handle = SourceHandle::new(session.execution_id.clone(), transport);
                handle.open(feed, SourceSink::new(session.generation, tx));
                session.handle = Some(handle);
                updates.push(TrackerUpdate::Loaded {
                    execution,
                    transport: Some(transport),
                });
            }
        }
    }

    fn on_source(&mut self, event: SourceEvent, updates: &mut Vec<TrackerUpdate>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            SourceEvent::Opened => {
                if session.connection == ConnectionState::Connecting {
                    session.connection = ConnectionState::Streaming;
                    updates.push(TrackerUpdate::Connected);
                }
            }
            SourceEvent::Event(LogEvent::Line { text }) => {
                if session.provenance != Provenance::Streamed {
                    debug!(execution = %session.execution_id, "dropping live line for seeded session");
                    return;
                }
                let scroll_to_end = session.buffer.append(text);
                updates.push(TrackerUpdate::LinesAppended {
                    count: 1,
                    scroll_to_end,
                });
            }
            SourceEvent::Event(LogEvent::Status { status }) => {
                let Some(lifecycle) = session.lifecycle.as_mut() else {
                    return;
                };
                let transition = lifecycle.apply(status);
                if let Transition::Advanced { to, .. } = transition {
                    updates.push(TrackerUpdate::StatusChanged(to));
                }
                if transition.reached_terminal() {
                    self.finish(updates);
                }
            }
            SourceEvent::Event(LogEvent::Finished) => self.finish(updates),
            SourceEvent::Event(LogEvent::Heartbeat) => {}
            SourceEvent::Error(reason) => self.disconnect(reason, updates),
            SourceEvent::Closed => {
                self.disconnect("stream closed by server".to_string(), updates)
            }
        }
    }

    /// Close the transport, keep the buffer, and refresh the detail once.
    fn finish(&mut self, updates: &mut Vec<TrackerUpdate>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.connection == ConnectionState::Finished {
            return;
        }
        info!(execution = %session.execution_id, lines = session.buffer.len(), "execution finished");
        session.close_transport();
        session.connection = ConnectionState::Finished;
        updates.push(TrackerUpdate::Finished);
        self.reconcile();
    }

    fn disconnect(&mut self, reason: String, updates: &mut Vec<TrackerUpdate>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.connection.is_streaming() {
            return;
        }
        warn!(execution = %session.execution_id, "live log disconnected: {reason}");
        session.close_transport();
        session.connection = ConnectionState::Disconnected(reason.clone());
        updates.push(TrackerUpdate::Disconnected(reason));
        self.reconcile();
    }

    fn reconcile(&mut self) {
        let feed = self.feed.clone();
        let tx = self.tx.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let id = session.execution_id.clone();
        let generation = session.generation;
        session.replace_fetch(tokio::spawn(async move {
            let result = feed.execution(&id).await.map_err(|e| format!("{e:#}"));
            let _ = tx.send(Envelope {
                generation,
                payload: Payload::Reconciled(result),
            });
        }));
    }

    fn on_reconciled(
        &mut self,
        result: Result<Execution, String>,
        updates: &mut Vec<TrackerUpdate>,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let execution = match result {
            Ok(execution) => execution,
            Err(reason) => {
                warn!(execution = %session.execution_id, "reconciliation fetch failed: {reason}");
                return;
            }
        };

        if let Some(lifecycle) = session.lifecycle.as_mut() {
            if let Transition::Advanced { to, .. } = lifecycle.apply(execution.status) {
                updates.push(TrackerUpdate::StatusChanged(to));
            }
        }
        session.detail = Some(execution.clone());
        updates.push(TrackerUpdate::Reconciled(execution));

        let terminal = session.status().is_some_and(ExecutionStatus::is_terminal);
        if terminal && matches!(session.connection, ConnectionState::Disconnected(_)) {
            session.connection = ConnectionState::Finished;
            updates.push(TrackerUpdate::Finished);
        }
    }

    // ── Read side ─────────────────────────────────────────────────────────

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    pub fn tracked_id(&self) -> Option<&ExecutionId> {
        self.session.as_ref().map(TrackingSession::execution_id)
    }

    pub fn lines(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|session| session.buffer.lines())
            .unwrap_or(&[])
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.session.as_ref().and_then(TrackingSession::status)
    }

    pub fn connection(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|session| session.connection.clone())
            .unwrap_or(ConnectionState::Idle)
    }

    pub fn is_streaming(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(TrackingSession::is_streaming)
    }

    /// Number of transport handles currently open (0 or 1).
    pub fn open_handles(&self) -> usize {
        usize::from(
            self.session
                .as_ref()
                .is_some_and(TrackingSession::has_open_handle),
        )
    }

    // ── Follow mode ───────────────────────────────────────────────────────

    pub fn follow_mode(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.buffer.follow_mode())
            .unwrap_or(self.options.follow)
    }

    pub fn set_follow_mode(&mut self, follow: bool) {
        if let Some(session) = self.session.as_mut() {
            session.buffer.set_follow_mode(follow);
        }
    }

    pub fn toggle_follow_mode(&mut self) {
        let next = !self.follow_mode();
        self.set_follow_mode(next);
    }

    pub fn take_scroll_request(&mut self) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.buffer.take_scroll_request())
    }
}

impl Drop for TrackingCoordinator {
    fn drop(&mut self) {
        self.untrack();
    }
}

async fn source_exited(handle: Option<&mut SourceHandle>) {
    match handle {
        Some(handle) => handle.exited().await,
        None => std::future::pending().await,
    }
}

/// Fetch detail, pick a transport for live executions, report back.
async fn load(
    feed: Arc<dyn ExecutionFeed>,
    id: ExecutionId,
    preference: TransportPreference,
    poll_interval: Duration,
    push_supported: Option<bool>,
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
) {
    let payload = match feed.execution(&id).await {
        Ok(execution) if execution.is_live() => {
            let (transport, push_supported) = match preference {
                TransportPreference::Push => (Transport::Push, push_supported),
                TransportPreference::Poll => (
                    Transport::Poll {
                        interval: poll_interval,
                    },
                    push_supported,
                ),
                TransportPreference::Auto => {
                    let push = match push_supported {
                        Some(push) => push,
                        None => feed.supports_push().await,
                    };
                    let transport = if push {
                        Transport::Push
                    } else {
                        Transport::Poll {
                            interval: poll_interval,
                        }
                    };
                    (transport, Some(push))
                }
            };
            debug!(execution = %id, transport = transport.name(), "execution is live");
            Payload::Loaded {
                execution,
                transport: Some(transport),
                push_supported,
            }
        }
        Ok(execution) => Payload::Loaded {
            execution,
            transport: None,
            push_supported,
        },
        Err(e) => Payload::LoadFailed(format!("{e:#}")),
    };
    let _ = tx.send(Envelope {
        generation,
        payload,
    });
}

/// Merge runs of single-line appends into one update.
fn coalesce(updates: Vec<TrackerUpdate>) -> Vec<TrackerUpdate> {
    let mut out: Vec<TrackerUpdate> = Vec::with_capacity(updates.len());
    for update in updates {
        if let TrackerUpdate::LinesAppended {
            count,
            scroll_to_end,
        } = &update
        {
            if let Some(TrackerUpdate::LinesAppended {
                count: prev_count,
                scroll_to_end: prev_scroll,
            }) = out.last_mut()
            {
                *prev_count += count;
                *prev_scroll |= scroll_to_end;
                continue;
            }
        }
        out.push(update);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFeed;
    use execwatch_core::api::LogChunk;
    use execwatch_core::testing::{finished, running};

    fn coordinator(feed: &Arc<FakeFeed>, transport: TransportPreference) -> TrackingCoordinator {
        TrackingCoordinator::new(
            feed.clone(),
            CoordinatorOptions {
                transport,
                poll_interval: Duration::from_millis(500),
                follow: true,
            },
        )
    }

    /// Run `recv` until `done` holds, collecting every update on the way.
    async fn drive_until(
        coordinator: &mut TrackingCoordinator,
        done: impl Fn(&TrackingCoordinator) -> bool,
    ) -> Vec<TrackerUpdate> {
        let mut seen = Vec::new();
        while !done(coordinator) {
            let updates = tokio::time::timeout(Duration::from_secs(2), coordinator.recv())
                .await
                .expect("coordinator stalled");
            seen.extend(updates);
        }
        seen
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn streaming(c: &TrackingCoordinator) -> bool {
        c.connection() == ConnectionState::Streaming
    }

    fn inject(c: &TrackingCoordinator, generation: u64, event: SourceEvent) {
        c.tx.send(Envelope {
            generation,
            payload: Payload::Source(event),
        })
        .unwrap();
    }

    #[tokio::test]
    async fn live_lines_are_appended_in_arrival_order() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        assert_eq!(c.connection(), ConnectionState::Loading);
        drive_until(&mut c, streaming).await;

        for text in ["one", "two", "three"] {
            feed.push_event(&id, LogEvent::line(text));
        }
        drive_until(&mut c, |c| c.lines().len() == 3).await;

        assert_eq!(c.lines(), ["one", "two", "three"]);
        assert_eq!(c.status(), Some(ExecutionStatus::Running));
        assert!(c.is_streaming());
        assert_eq!(c.open_handles(), 1);
        let session = c.session().unwrap();
        assert_eq!(session.provenance(), Provenance::Streamed);
        assert_eq!(session.transport(), Some(Transport::Push));
    }

    #[tokio::test]
    async fn finished_execution_is_seeded_without_opening_a_transport() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(finished("b", ExecutionStatus::Success, "x\ny\n"));
        let mut c = coordinator(&feed, TransportPreference::Auto);

        c.track(ExecutionId::new("b"));
        let updates = drive_until(&mut c, |c| c.connection() == ConnectionState::Finished).await;

        assert_eq!(c.lines(), ["x", "y"]);
        assert!(!c.is_streaming());
        assert_eq!(c.open_handles(), 0);
        assert_eq!(feed.subscribe_calls(), 0);
        assert_eq!(feed.poll_calls(), 0);
        assert_eq!(c.session().unwrap().provenance(), Provenance::Persisted);
        assert!(updates.contains(&TrackerUpdate::LinesAppended {
            count: 2,
            scroll_to_end: true,
        }));
    }

    #[tokio::test]
    async fn lines_never_reach_a_seeded_session() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(finished("b", ExecutionStatus::Failed, "boom"));
        let mut c = coordinator(&feed, TransportPreference::Push);
        c.track(ExecutionId::new("b"));
        drive_until(&mut c, |c| c.connection() == ConnectionState::Finished).await;

        inject(&c, c.generation, SourceEvent::Event(LogEvent::line("late")));
        assert!(c.pump().is_empty());
        assert_eq!(c.lines(), ["boom"]);
    }

    #[tokio::test]
    async fn switching_targets_closes_the_previous_transport_first() {
        let feed = Arc::new(FakeFeed::new(true));
        let a = ExecutionId::new("a");
        let b = ExecutionId::new("b");
        feed.set_detail(running("a"));
        feed.set_detail(running("b"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(a.clone());
        drive_until(&mut c, streaming).await;
        feed.push_event(&a, LogEvent::line("from a"));
        drive_until(&mut c, |c| c.lines().len() == 1).await;

        c.track(b.clone());
        assert_eq!(c.open_handles(), 0);
        assert!(c.lines().is_empty());
        assert_eq!(c.tracked_id(), Some(&b));
        settle().await;
        assert_eq!(feed.live_connections(), 0);

        drive_until(&mut c, streaming).await;
        assert_eq!(c.open_handles(), 1);
        assert_eq!(feed.live_connections(), 1);
        assert_eq!(feed.subscribe_calls_for(&a), 1);
        assert_eq!(feed.subscribe_calls_for(&b), 1);
    }

    #[tokio::test]
    async fn only_the_last_of_three_targets_holds_a_connection() {
        let feed = Arc::new(FakeFeed::new(true));
        for id in ["a", "b", "c"] {
            feed.set_detail(running(id));
        }
        let mut c = coordinator(&feed, TransportPreference::Push);

        for id in ["a", "b", "c"] {
            c.track(ExecutionId::new(id));
            assert!(c.open_handles() <= 1);
            drive_until(&mut c, streaming).await;
            assert_eq!(c.open_handles(), 1);
        }
        settle().await;

        assert_eq!(c.tracked_id(), Some(&ExecutionId::new("c")));
        assert_eq!(feed.live_connections(), 1);
        assert_eq!(feed.subscribe_calls(), 3);
    }

    #[tokio::test]
    async fn follow_mode_resets_for_each_new_session() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(running("a"));
        feed.set_detail(finished("b", ExecutionStatus::Success, "ok"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(ExecutionId::new("a"));
        drive_until(&mut c, streaming).await;
        c.set_follow_mode(false);
        assert!(!c.follow_mode());

        c.track(ExecutionId::new("b"));
        assert!(c.follow_mode());
        drive_until(&mut c, |c| c.connection() == ConnectionState::Finished).await;
        assert!(c.follow_mode());
        assert!(c.take_scroll_request());
    }

    #[tokio::test]
    async fn messages_from_a_superseded_session_are_dropped() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(running("a"));
        feed.set_detail(running("b"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(ExecutionId::new("a"));
        drive_until(&mut c, streaming).await;
        let stale = c.generation;
        c.track(ExecutionId::new("b"));
        drive_until(&mut c, streaming).await;

        inject(&c, stale, SourceEvent::Event(LogEvent::line("from a")));
        inject(
            &c,
            stale,
            SourceEvent::Event(LogEvent::status(ExecutionStatus::Failed)),
        );
        inject(&c, stale, SourceEvent::Closed);

        assert!(c.pump().is_empty());
        assert!(c.lines().is_empty());
        assert_eq!(c.status(), Some(ExecutionStatus::Running));
        assert!(c.is_streaming());
    }

    #[tokio::test]
    async fn finish_keeps_the_buffer_closes_transport_and_reconciles() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        feed.push_event(&id, LogEvent::line("building"));
        feed.push_event(&id, LogEvent::line("done"));
        drive_until(&mut c, |c| c.lines().len() == 2).await;

        feed.set_detail(finished("a", ExecutionStatus::Success, "stored\nlog"));
        feed.push_event(&id, LogEvent::Finished);
        let updates = drive_until(&mut c, |c| {
            c.session()
                .and_then(TrackingSession::detail)
                .is_some_and(|detail| detail.duration_ms.is_some())
        })
        .await;

        assert!(updates.contains(&TrackerUpdate::Finished));
        assert!(updates.contains(&TrackerUpdate::StatusChanged(ExecutionStatus::Success)));
        assert_eq!(c.lines(), ["building", "done"]);
        assert_eq!(c.connection(), ConnectionState::Finished);
        assert_eq!(c.status(), Some(ExecutionStatus::Success));
        assert_eq!(c.open_handles(), 0);
        assert_eq!(feed.detail_calls(), 2);
        settle().await;
        assert_eq!(feed.live_connections(), 0);
    }

    #[tokio::test]
    async fn terminal_status_event_finishes_and_status_never_regresses() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        feed.push_event(&id, LogEvent::status(ExecutionStatus::Failed));
        let updates = drive_until(&mut c, |c| c.connection() == ConnectionState::Finished).await;
        assert_eq!(
            updates,
            vec![
                TrackerUpdate::StatusChanged(ExecutionStatus::Failed),
                TrackerUpdate::Finished,
            ]
        );

        inject(
            &c,
            c.generation,
            SourceEvent::Event(LogEvent::status(ExecutionStatus::Running)),
        );
        inject(&c, c.generation, SourceEvent::Event(LogEvent::Finished));
        let later = c.pump();
        assert!(!later.contains(&TrackerUpdate::Finished));
        assert_eq!(c.status(), Some(ExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn retracking_the_live_execution_is_a_noop() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        c.track(id.clone());
        settle().await;

        assert_eq!(feed.detail_calls(), 1);
        assert_eq!(feed.subscribe_calls(), 1);
        assert_eq!(feed.live_connections(), 1);
    }

    #[tokio::test]
    async fn switching_before_the_first_load_resolves_opens_only_the_second() {
        let feed = Arc::new(FakeFeed::new(true));
        let a = ExecutionId::new("a");
        let b = ExecutionId::new("b");
        feed.set_detail(running("a"));
        feed.set_detail(running("b"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(a.clone());
        c.track(b.clone());
        drive_until(&mut c, streaming).await;
        settle().await;
        c.pump();

        assert_eq!(c.tracked_id(), Some(&b));
        assert_eq!(feed.subscribe_calls_for(&a), 0);
        assert_eq!(feed.subscribe_calls_for(&b), 1);
        assert_eq!(feed.live_connections(), 1);
        assert_eq!(c.open_handles(), 1);
    }

    #[tokio::test]
    async fn configured_follow_default_applies_to_each_new_session() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(running("a"));
        feed.set_detail(running("b"));
        let mut c = TrackingCoordinator::new(
            feed.clone(),
            CoordinatorOptions {
                transport: TransportPreference::Push,
                follow: false,
                ..CoordinatorOptions::default()
            },
        );

        c.track(ExecutionId::new("a"));
        assert!(!c.follow_mode());
        c.set_follow_mode(true);
        assert!(c.follow_mode());

        c.track(ExecutionId::new("b"));
        assert!(!c.follow_mode());
    }

    #[tokio::test]
    async fn panicking_poll_source_disconnects() {
        let feed = Arc::new(FakeFeed::new(false));
        feed.set_detail(running("a"));
        feed.panic_on_poll();
        let mut c = coordinator(&feed, TransportPreference::Poll);

        c.track(ExecutionId::new("a"));
        let updates = drive_until(&mut c, |c| {
            matches!(c.connection(), ConnectionState::Disconnected(_))
        })
        .await;

        assert!(updates.contains(&TrackerUpdate::Disconnected(
            "log source stopped unexpectedly".to_string()
        )));
        assert!(!c.is_streaming());
        assert_eq!(c.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hostile_poll_offset_keeps_the_session_alive() {
        let feed = Arc::new(FakeFeed::new(false));
        feed.set_detail(running("a"));
        feed.script_polls(vec![Ok(LogChunk {
            offset: u64::MAX,
            lines: vec!["x".into()],
            status: Some(ExecutionStatus::Running),
            finished: false,
        })]);
        let mut c = coordinator(&feed, TransportPreference::Poll);

        c.track(ExecutionId::new("a"));
        drive_until(&mut c, |c| c.lines().len() == 1).await;

        assert_eq!(c.lines(), ["x"]);
        assert_eq!(c.connection(), ConnectionState::Streaming);
        assert_eq!(c.open_handles(), 1);
    }

    #[tokio::test]
    async fn silently_stopped_source_is_noticed_by_recv() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        feed.push_event(&id, LogEvent::line("before"));
        drive_until(&mut c, |c| c.lines().len() == 1).await;

        c.session
            .as_ref()
            .and_then(|session| session.handle.as_ref())
            .unwrap()
            .kill_silently();
        let updates = drive_until(&mut c, |c| !c.is_streaming()).await;

        assert!(updates.contains(&TrackerUpdate::Disconnected(
            "log source stopped unexpectedly".to_string()
        )));
        assert_eq!(c.lines(), ["before"]);
        assert_eq!(c.open_handles(), 0);
    }

    #[tokio::test]
    async fn silently_stopped_source_is_noticed_by_pump() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(ExecutionId::new("a"));
        drive_until(&mut c, streaming).await;
        c.session
            .as_ref()
            .and_then(|session| session.handle.as_ref())
            .unwrap()
            .kill_silently();
        settle().await;

        let updates = c.pump();
        assert!(matches!(
            updates.as_slice(),
            [TrackerUpdate::Disconnected(reason)] if reason.contains("unexpectedly")
        ));
        assert!(matches!(c.connection(), ConnectionState::Disconnected(_)));
    }

    #[tokio::test]
    async fn server_hang_up_disconnects_and_keeps_lines() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        feed.push_event(&id, LogEvent::line("partial"));
        feed.hang_up(&id);
        let updates = drive_until(&mut c, |c| {
            matches!(c.connection(), ConnectionState::Disconnected(_))
        })
        .await;

        assert!(updates.contains(&TrackerUpdate::Disconnected(
            "stream closed by server".to_string()
        )));
        assert_eq!(c.lines(), ["partial"]);
        assert!(!c.is_streaming());

        // Manual retry opens a fresh subscription.
        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        assert_eq!(feed.subscribe_calls_for(&id), 2);
        assert!(c.lines().is_empty());
    }

    #[tokio::test]
    async fn reconcile_after_disconnect_can_mark_finished() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        feed.set_detail(finished("a", ExecutionStatus::Cancelled, "ignored"));
        feed.hang_up(&id);
        drive_until(&mut c, |c| c.connection() == ConnectionState::Finished).await;

        assert_eq!(c.status(), Some(ExecutionStatus::Cancelled));
        assert!(c.lines().is_empty());
    }

    #[tokio::test]
    async fn subscribe_failure_disconnects() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(running("a"));
        feed.fail_subscribe("503 Service Unavailable");
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(ExecutionId::new("a"));
        drive_until(&mut c, |c| {
            matches!(c.connection(), ConnectionState::Disconnected(_))
        })
        .await;
        assert_eq!(c.open_handles(), 0);
    }

    #[tokio::test]
    async fn missing_execution_reports_load_failure() {
        let feed = Arc::new(FakeFeed::new(true));
        let mut c = coordinator(&feed, TransportPreference::Auto);

        c.track(ExecutionId::new("nope"));
        let updates = drive_until(&mut c, |c| {
            matches!(c.connection(), ConnectionState::Disconnected(_))
        })
        .await;

        assert!(matches!(updates.as_slice(), [TrackerUpdate::LoadFailed(reason)] if reason.contains("404")));
        assert_eq!(feed.subscribe_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_falls_back_to_polling_without_push_support() {
        let feed = Arc::new(FakeFeed::new(false));
        feed.set_detail(running("a"));
        feed.script_polls(vec![
            Ok(LogChunk {
                offset: 0,
                lines: vec!["a".into(), "b".into()],
                status: Some(ExecutionStatus::Running),
                finished: false,
            }),
            Ok(LogChunk {
                offset: 2,
                lines: vec!["c".into()],
                status: Some(ExecutionStatus::Success),
                finished: true,
            }),
        ]);
        let mut c = coordinator(&feed, TransportPreference::Auto);

        c.track(ExecutionId::new("a"));
        drive_until(&mut c, |c| c.connection() == ConnectionState::Finished).await;

        assert_eq!(c.lines(), ["a", "b", "c"]);
        assert_eq!(c.status(), Some(ExecutionStatus::Success));
        assert!(matches!(
            c.session().unwrap().transport(),
            Some(Transport::Poll { .. })
        ));
        assert_eq!(feed.subscribe_calls(), 0);
        assert_eq!(feed.poll_cursors(), vec![0, 2]);
    }

    #[tokio::test]
    async fn untrack_discards_session_and_closes_transport() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        c.untrack();
        c.untrack();

        assert_eq!(c.connection(), ConnectionState::Idle);
        assert!(c.lines().is_empty());
        assert_eq!(c.tracked_id(), None);
        settle().await;
        assert_eq!(feed.live_connections(), 0);
    }

    #[tokio::test]
    async fn dropping_the_coordinator_releases_the_transport() {
        let feed = Arc::new(FakeFeed::new(true));
        feed.set_detail(running("a"));
        {
            let mut c = coordinator(&feed, TransportPreference::Push);
            c.track(ExecutionId::new("a"));
            drive_until(&mut c, streaming).await;
            assert_eq!(feed.live_connections(), 1);
        }
        settle().await;
        assert_eq!(feed.live_connections(), 0);
    }

    #[tokio::test]
    async fn follow_toggle_changes_scrolling_not_content() {
        let feed = Arc::new(FakeFeed::new(true));
        let id = ExecutionId::new("a");
        feed.set_detail(running("a"));
        let mut c = coordinator(&feed, TransportPreference::Push);

        c.track(id.clone());
        drive_until(&mut c, streaming).await;
        c.set_follow_mode(false);
        feed.push_event(&id, LogEvent::line("quiet"));
        let updates = drive_until(&mut c, |c| c.lines().len() == 1).await;
        assert!(updates.contains(&TrackerUpdate::LinesAppended {
            count: 1,
            scroll_to_end: false,
        }));
        assert!(!c.take_scroll_request());

        c.toggle_follow_mode();
        assert!(c.follow_mode());
        assert!(c.take_scroll_request());
        assert_eq!(c.lines(), ["quiet"]);
    }

    #[test]
    fn adjacent_line_appends_are_merged() {
        let merged = coalesce(vec![
            TrackerUpdate::Connected,
            TrackerUpdate::LinesAppended {
                count: 1,
                scroll_to_end: false,
            },
            TrackerUpdate::LinesAppended {
                count: 2,
                scroll_to_end: true,
            },
            TrackerUpdate::StatusChanged(ExecutionStatus::Success),
            TrackerUpdate::LinesAppended {
                count: 1,
                scroll_to_end: false,
            },
        ]);
        assert_eq!(
            merged,
            vec![
                TrackerUpdate::Connected,
                TrackerUpdate::LinesAppended {
                    count: 3,
                    scroll_to_end: true,
                },
                TrackerUpdate::StatusChanged(ExecutionStatus::Success),
                TrackerUpdate::LinesAppended {
                    count: 1,
                    scroll_to_end: false,
                },
            ]
        );
    }

    #[test]
    fn badges() {
        assert_eq!(ConnectionState::Streaming.badge(), "live");
        assert!(ConnectionState::Connecting.is_streaming());
        assert!(!ConnectionState::Disconnected("x".into()).is_streaming());
    }
}
