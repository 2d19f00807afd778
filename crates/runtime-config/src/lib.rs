//! Shared runtime configuration types.
//!
//! The CLI reads/writes `execwatch.toml` using these types. Loading from disk
//! and environment overrides live in the CLI crate; the live-tracking crate
//! only consumes the resolved [`TrackingSettings`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Canonical config file name.
pub const CONFIG_FILE_NAME: &str = "execwatch.toml";

/// Environment variable that overrides `[server].url`.
pub const SERVER_URL_ENV: &str = "EXECWATCH_SERVER_URL";

/// Top-level configuration (persisted as `execwatch.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WatchConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSettings {
    #[serde(default)]
    pub transport: TransportPreference,
    /// Interval between poll-mode requests.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries for execution detail fetches. Live transports never retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Follow mode for newly opened sessions.
    #[serde(default = "default_true")]
    pub follow: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            transport: TransportPreference::Auto,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            follow: true,
        }
    }
}

impl TrackingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

const MIN_POLL_INTERVAL_MS: u64 = 100;

/// How live log output is acquired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportPreference {
    /// Push when the server advertises it, otherwise poll.
    #[default]
    Auto,
    #[serde(alias = "sse", alias = "stream")]
    Push,
    #[serde(alias = "polling")]
    Poll,
}

impl TransportPreference {
    pub fn display(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

impl std::str::FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "push" | "sse" | "stream" => Ok(Self::Push),
            "poll" | "polling" => Ok(Self::Poll),
            other => Err(format!(
                "unknown transport '{other}' (expected auto, push or poll)"
            )),
        }
    }
}

// ── Serde default functions ─────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    2
}
fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

/// Apply compatibility fallbacks after loading raw TOML.
/// Returns true when any field was updated.
pub fn apply_compat_fallbacks(config: &mut WatchConfig) -> bool {
    let mut changed = false;

    if config.server.url.trim().is_empty() {
        config.server.url = default_server_url();
        changed = true;
    }

    let trimmed = config.server.url.trim_end_matches('/');
    if trimmed.len() != config.server.url.len() {
        config.server.url = trimmed.to_string();
        changed = true;
    }

    if config.tracking.poll_interval_ms < MIN_POLL_INTERVAL_MS {
        config.tracking.poll_interval_ms = MIN_POLL_INTERVAL_MS;
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: WatchConfig = toml::from_str("").expect("parse toml");
        assert_eq!(cfg.tracking.transport, TransportPreference::Auto);
        assert_eq!(cfg.tracking.poll_interval(), Duration::from_secs(1));
        assert!(cfg.tracking.follow);
        assert!(cfg.server.api_key.is_empty());
    }

    #[test]
    fn transport_aliases_are_accepted() {
        let cfg: WatchConfig = toml::from_str(
            r#"
[tracking]
transport = "sse"
"#,
        )
        .expect("parse toml");
        assert_eq!(cfg.tracking.transport, TransportPreference::Push);

        let cfg: WatchConfig = toml::from_str(
            r#"
[tracking]
transport = "polling"
poll_interval_ms = 250
"#,
        )
        .expect("parse toml");
        assert_eq!(cfg.tracking.transport, TransportPreference::Poll);
        assert_eq!(cfg.tracking.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn apply_compat_fallbacks_normalizes_values() {
        let mut cfg = WatchConfig::default();
        cfg.server.url = "http://jobs.internal:9000/".to_string();
        cfg.tracking.poll_interval_ms = 5;

        assert!(apply_compat_fallbacks(&mut cfg));
        assert_eq!(cfg.server.url, "http://jobs.internal:9000");
        assert_eq!(cfg.tracking.poll_interval_ms, 100);
    }

    #[test]
    fn apply_compat_fallbacks_is_noop_for_modern_values() {
        let mut cfg = WatchConfig::default();
        assert!(!apply_compat_fallbacks(&mut cfg));
    }

    #[test]
    fn transport_from_str_rejects_unknown() {
        assert_eq!(
            "PUSH".parse::<TransportPreference>(),
            Ok(TransportPreference::Push)
        );
        assert!("carrier-pigeon".parse::<TransportPreference>().is_err());
    }

    #[test]
    fn config_serializes_every_section() {
        let encoded = toml::to_string(&WatchConfig::default()).expect("serialize config");
        assert!(encoded.contains("[server]"));
        assert!(encoded.contains("[tracking]"));
        assert!(encoded.contains("transport = \"auto\""));
    }
}
