//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; a frame is only emitted once its blank
//! terminator line has been seen, so a line split across two chunks is never
//! delivered half-way.

use std::collections::VecDeque;
use std::pin::Pin;

use anyhow::{bail, Context};
use bytes::Bytes;
use execwatch_core::LogEvent;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

/// Longest unterminated line the decoder will buffer.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `: ...` line. Servers use these as keep-alives.
    Comment(String),
    Event { name: Option<String>, data: String },
}

impl SseFrame {
    /// Normalize a frame into a [`LogEvent`].
    ///
    /// `data` is expected to be a JSON `LogEvent`. A bare `event: line` or
    /// `event: finished` frame with non-JSON data is accepted as well; any
    /// other unparseable frame becomes a heartbeat.
    pub fn into_log_event(self) -> LogEvent {
        match self {
            SseFrame::Comment(_) => LogEvent::Heartbeat,
            SseFrame::Event { name, data } => {
                let decoded = LogEvent::decode(&data);
                if !decoded.is_heartbeat() {
                    return decoded;
                }
                match name.as_deref() {
                    Some("line") if !data.is_empty() => LogEvent::line(data),
                    Some("finished") => LogEvent::Finished,
                    _ => LogEvent::Heartbeat,
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event_name: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every complete line in `chunk`.
    ///
    /// Fails once the unterminated remainder grows past [`MAX_LINE_BYTES`];
    /// the decoder is reset and the frames from this chunk are dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<SseFrame>> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline_pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline_pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        if self.pending.len() > MAX_LINE_BYTES {
            let size = self.pending.len();
            *self = Self::default();
            bail!("event stream line exceeds {MAX_LINE_BYTES} bytes ({size} buffered)");
        }
        Ok(frames)
    }

    /// Flush at end of body. An unterminated trailing frame is still
    /// delivered.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        if let Some(frame) = self.dispatch() {
            frames.push(frame);
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(comment) = line.strip_prefix(':') {
            return Some(SseFrame::Comment(comment.trim().to_string()));
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event_name = Some(value.to_string()),
            // `id` and `retry` only matter for reconnecting clients.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event_name.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        let name = self.event_name.take();
        Some(SseFrame::Event { name, data })
    }
}

pub type LogEventStream = BoxStream<'static, anyhow::Result<LogEvent>>;

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<LogEvent>,
    done: bool,
}

/// Turn a raw SSE byte stream into a stream of [`LogEvent`]s.
///
/// A body error or an oversized line is yielded once and ends the stream.
pub fn decode_event_stream<S, E>(body: S) -> LogEventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.feed(&chunk) {
                    Ok(frames) => state
                        .ready
                        .extend(frames.into_iter().map(SseFrame::into_log_event)),
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.done = true;
                    let err: anyhow::Result<LogEvent> = Err(e).context("event stream interrupted");
                    return Some((err, state));
                }
                None => {
                    state.done = true;
                    let frames = state.decoder.finish();
                    state
                        .ready
                        .extend(frames.into_iter().map(SseFrame::into_log_event));
                }
            }
        }
    })
    .boxed()
}
