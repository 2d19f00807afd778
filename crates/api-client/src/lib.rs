pub mod client;
pub mod retry;
pub mod sse;

pub use client::ApiClient;
pub use execwatch_core;
pub use retry::RetryConfig;
pub use sse::{decode_event_stream, LogEventStream, SseDecoder, SseFrame, MAX_LINE_BYTES};
