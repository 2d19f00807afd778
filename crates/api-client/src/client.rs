use std::time::Duration;

use anyhow::{bail, Result};

use execwatch_core::api::{CapabilitiesResponse, LogChunk};
use execwatch_core::{Execution, ExecutionId};

use crate::retry::{retry_get, RetryConfig};
use crate::sse::{decode_event_stream, LogEventStream};

/// Typed HTTP client for the job system's execution endpoints.
///
/// Holds two `reqwest::Client`s: one with a whole-request timeout for plain
/// JSON calls, and one with only a connect timeout for the long-lived event
/// stream, which would otherwise be cut off mid-run.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Create a new client with the given base URL and timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Create from an existing `reqwest::Client` (e.g. shared in tests).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            stream_client: client.clone(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
        }
    }

    pub fn set_auth(&mut self, token: String) {
        if token.trim().is_empty() {
            self.auth_token = None;
        } else {
            self.auth_token = Some(token);
        }
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn execution_url(&self, id: &ExecutionId, suffix: &str) -> String {
        self.url(&format!(
            "/executions/{}{suffix}",
            urlencoding::encode(id.as_str())
        ))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match self.auth_token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    // ── Capabilities ──────────────────────────────────────────────────────

    pub async fn capabilities(&self) -> Result<CapabilitiesResponse> {
        let resp = self.get(&self.url("/capabilities")).send().await?;
        parse_response(resp).await
    }

    // ── Executions ────────────────────────────────────────────────────────

    pub async fn get_execution(&self, id: &ExecutionId) -> Result<Execution> {
        let resp = self.get(&self.execution_url(id, "")).send().await?;
        parse_response(resp).await
    }

    /// Detail fetch that retries on network errors and 5xx.
    pub async fn get_execution_with_retry(
        &self,
        id: &ExecutionId,
        config: &RetryConfig,
    ) -> Result<Execution> {
        let url = self.execution_url(id, "");
        let resp = retry_get(&self.client, &url, self.auth_token(), config).await?;
        parse_response(resp).await
    }

    /// Log lines starting at `cursor` (a line index into the full log).
    pub async fn get_log_since(&self, id: &ExecutionId, cursor: u64) -> Result<LogChunk> {
        let url = self.execution_url(id, &format!("/log?cursor={cursor}"));
        let resp = self.get(&url).send().await?;
        parse_response(resp).await
    }

    /// Open the server-sent event stream for one execution.
    ///
    /// Resolves once response headers arrive; events are decoded lazily as
    /// the returned stream is polled. Dropping the stream closes the
    /// connection.
    pub async fn open_event_stream(&self, id: &ExecutionId) -> Result<LogEventStream> {
        let mut req = self
            .stream_client
            .get(self.execution_url(id, "/events"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        if let Some(token) = self.auth_token.as_deref() {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("{status}: {body}");
        }
        Ok(decode_event_stream(resp.bytes_stream()))
    }
}

/// Parse an HTTP response: return the deserialized body on 2xx,
/// or an error containing the status and body text.
async fn parse_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{status}: {body}");
    }
    Ok(resp.json().await?)
}
