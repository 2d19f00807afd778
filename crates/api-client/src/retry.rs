use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

/// Retry policy for idempotent detail fetches.
///
/// Live transports (push stream, poll loop) never go through this: their
/// errors are reported and reconnection is left to the caller.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub delays: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delays: vec![1, 2],
        }
    }
}

impl RetryConfig {
    /// Exponential backoff (1s, 2s, 4s, ... capped at 16s) for `max_retries`.
    pub fn with_max_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            delays: (0..max_retries).map(|i| 1u64 << i.min(4)).collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delays: Vec::new(),
        }
    }
}

/// Retry an HTTP GET with exponential backoff.
///
/// Retries on network errors and 5xx responses.
/// Returns immediately on success or 4xx.
pub async fn retry_get(
    client: &reqwest::Client,
    url: &str,
    auth_token: Option<&str>,
    config: &RetryConfig,
) -> Result<reqwest::Response> {
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        let mut req = client.get(url);
        if let Some(token) = auth_token {
            req = req.bearer_auth(token);
        }

        let delay = config.delays.get(attempt).copied();
        match (req.send().await, delay) {
            (Ok(resp), Some(delay)) if resp.status().is_server_error() => {
                warn!(
                    "GET attempt {}/{} failed (HTTP {}), retrying in {}s…",
                    attempt + 1,
                    max_attempts,
                    resp.status(),
                    delay,
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            (Ok(resp), _) => return Ok(resp),
            (Err(e), Some(delay)) => {
                warn!(
                    "GET attempt {}/{} failed ({}), retrying in {}s…",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay,
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            (Err(e), None) => {
                return Err(e).context("Failed to connect after retries");
            }
        }
        attempt += 1;
    }
}
