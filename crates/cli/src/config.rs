use anyhow::{Context, Result};
use execwatch_runtime_config::{
    apply_compat_fallbacks, TransportPreference, WatchConfig, CONFIG_FILE_NAME, SERVER_URL_ENV,
};
use std::path::{Path, PathBuf};

/// Get the config directory path (~/.config/execwatch/)
pub fn config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .context("Could not determine home directory")?;
    Ok(PathBuf::from(home).join(".config").join("execwatch"))
}

/// Canonical config file path.
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Read config from `path`, returning defaults if the file does not exist.
pub fn load_config_from(path: &Path) -> Result<WatchConfig> {
    if !path.exists() {
        return Ok(WatchConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let mut config: WatchConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    apply_compat_fallbacks(&mut config);
    Ok(config)
}

pub fn save_config_to(path: &Path, config: &WatchConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config dir at {}", dir.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config at {}", path.display()))?;
    Ok(())
}

/// Replace the server URL with `env_url` when it is set and non-blank.
fn apply_env_override(config: &mut WatchConfig, env_url: Option<String>) -> bool {
    match env_url {
        Some(url) if !url.trim().is_empty() => {
            config.server.url = url.trim().to_string();
            apply_compat_fallbacks(config);
            true
        }
        _ => false,
    }
}

/// Effective config: file on disk plus environment overrides.
pub fn load_config() -> Result<WatchConfig> {
    let mut config = load_config_from(&config_path()?)?;
    if apply_env_override(&mut config, std::env::var(SERVER_URL_ENV).ok()) {
        tracing::debug!(url = %config.server.url, "server url overridden from environment");
    }
    Ok(config)
}

fn mask_key(key: &str) -> String {
    if key.is_empty() {
        "(not set)".to_string()
    } else {
        let visible: String = key.chars().take(8).collect();
        format!("{visible}...")
    }
}

/// Print current config.
pub fn show_config() -> Result<()> {
    let config = load_config()?;
    let path = config_path()?;
    println!("Config file: {}", path.display());
    println!();
    println!("[server]");
    println!("  url     = {}", config.server.url);
    println!("  api_key = {}", mask_key(&config.server.api_key));
    println!();
    println!("[tracking]");
    println!("  transport            = {}", config.tracking.transport.display());
    println!("  poll_interval_ms     = {}", config.tracking.poll_interval_ms);
    println!("  request_timeout_secs = {}", config.tracking.request_timeout_secs);
    println!("  max_retries          = {}", config.tracking.max_retries);
    println!("  follow               = {}", config.tracking.follow);
    Ok(())
}

/// Update config with provided values. Environment overrides are not
/// written back.
pub fn set_config(
    server_url: Option<String>,
    api_key: Option<String>,
    transport: Option<TransportPreference>,
) -> Result<()> {
    let path = config_path()?;
    let mut config = load_config_from(&path)?;

    if let Some(url) = server_url {
        config.server.url = url;
    }
    if let Some(key) = api_key {
        config.server.api_key = key;
    }
    if let Some(transport) = transport {
        config.tracking.transport = transport;
    }
    apply_compat_fallbacks(&mut config);

    save_config_to(&path, &config)?;
    println!("Configuration updated.");
    show_config()?;
    Ok(())
}
