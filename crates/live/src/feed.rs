use async_trait::async_trait;
use tracing::debug;

use execwatch_api_client::{ApiClient, LogEventStream, RetryConfig};
use execwatch_core::api::LogChunk;
use execwatch_core::{Execution, ExecutionId};

/// Everything the tracking core needs from the job system.
///
/// Implemented over HTTP by [`ApiFeed`]; tests substitute an in-memory fake.
#[async_trait]
pub trait ExecutionFeed: Send + Sync {
    /// Execution detail, including the persisted log once finished.
    async fn execution(&self, id: &ExecutionId) -> anyhow::Result<Execution>;

    /// Log lines from line index `cursor` onward.
    async fn log_since(&self, id: &ExecutionId, cursor: u64) -> anyhow::Result<LogChunk>;

    /// Open a push subscription. Dropping the stream releases it.
    async fn subscribe(&self, id: &ExecutionId) -> anyhow::Result<LogEventStream>;

    /// Whether push subscriptions are available at all.
    async fn supports_push(&self) -> bool;
}

pub struct ApiFeed {
    api: ApiClient,
    retry: RetryConfig,
}

impl ApiFeed {
    pub fn new(api: ApiClient, retry: RetryConfig) -> Self {
        Self { api, retry }
    }
}

#[async_trait]
impl ExecutionFeed for ApiFeed {
    async fn execution(&self, id: &ExecutionId) -> anyhow::Result<Execution> {
        self.api.get_execution_with_retry(id, &self.retry).await
    }

    async fn log_since(&self, id: &ExecutionId, cursor: u64) -> anyhow::Result<LogChunk> {
        self.api.get_log_since(id, cursor).await
    }

    async fn subscribe(&self, id: &ExecutionId) -> anyhow::Result<LogEventStream> {
        self.api.open_event_stream(id).await
    }

    async fn supports_push(&self) -> bool {
        match self.api.capabilities().await {
            Ok(caps) => caps.live_push,
            Err(e) => {
                debug!("capabilities probe failed, assuming poll-only: {e:#}");
                false
            }
        }
    }
}
