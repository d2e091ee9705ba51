//! # Client Configuration
//!
//! Configuration management for the client engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TURBO_URL=ws://store.local:4000/ws                                 │
//! │     TURBO_AUTO_CONNECT=false                                           │
//! │     TURBO_CONNECT_TIMEOUT_SECS=5                                       │
//! │     TURBO_TX_MAX_ATTEMPTS=10                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/turbo/client.toml (Linux)                                │
//! │     ~/Library/Application Support/dev.turbo.turbo/client.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     ws://localhost:4000/ws, auto-connect, 25 transaction attempts      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # client.toml
//! [server]
//! url = "ws://localhost:4000/ws"
//!
//! [connection]
//! auto_connect = true
//! connect_timeout_secs = 10
//! ping_interval_secs = 30
//!
//! [transaction]
//! max_attempts = 25       # 0 = retry until the store accepts
//! initial_backoff_ms = 0  # 0 = retry immediately on conflict
//! max_backoff_ms = 2000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

// =============================================================================
// Server Settings
// =============================================================================

/// Where the store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Store URL. Normalized by [`normalize_url`] before use.
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "ws://localhost:4000/ws".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings { url: default_url() }
    }
}

// =============================================================================
// Connection Settings
// =============================================================================

/// Socket lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Open the socket on the first subscribe or write.
    ///
    /// When false, frames queue until `go_online()` is called.
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Keepalive ping interval (seconds).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    30
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            auto_connect: true,
            connect_timeout_secs: default_connect_timeout(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

// =============================================================================
// Transaction Settings
// =============================================================================

/// Conflict retry policy for transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSettings {
    /// Maximum conditional writes per transaction.
    /// Set to 0 to retry until the store accepts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds). 0 retries immediately.
    #[serde(default)]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    25
}

fn default_max_backoff() -> u64 {
    2_000
}

impl Default for TransactionSettings {
    fn default() -> Self {
        TransactionSettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: 0,
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl TransactionSettings {
    /// Delay before the first retry, if retries are delayed at all.
    pub fn initial_backoff(&self) -> Option<Duration> {
        (self.initial_backoff_ms > 0).then(|| Duration::from_millis(self.initial_backoff_ms))
    }

    /// Upper bound on the retry delay.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }
}

// =============================================================================
// Main Client Configuration
// =============================================================================

/// Complete client configuration.
///
/// ## Example Config File
/// ```toml
/// [server]
/// url = "wss://store.example.com/ws"
///
/// [connection]
/// auto_connect = false
///
/// [transaction]
/// max_attempts = 10
/// initial_backoff_ms = 20
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Store location.
    #[serde(default)]
    pub server: ServerSettings,

    /// Socket lifecycle.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Transaction retry policy.
    #[serde(default)]
    pub transaction: TransactionSettings,
}

impl ClientConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a default config pointing at `url`.
    pub fn for_url(url: impl Into<String>) -> Self {
        ClientConfig {
            server: ServerSettings { url: url.into() },
            ..Default::default()
        }
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (client.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ClientResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading client config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load client config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ClientResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ClientError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| ClientError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Client config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        normalize_url(&self.server.url)?;

        if self.connection.connect_timeout_secs == 0 {
            return Err(ClientError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.connection.ping_interval_secs == 0 {
            return Err(ClientError::InvalidConfig(
                "ping_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TURBO_URL") {
            debug!(url = %url, "Overriding store URL from environment");
            self.server.url = url;
        }

        if let Ok(flag) = std::env::var("TURBO_AUTO_CONNECT") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.connection.auto_connect = true,
                "0" | "false" | "no" => self.connection.auto_connect = false,
                _ => warn!(value = %flag, "Unknown TURBO_AUTO_CONNECT value in environment"),
            }
        }

        if let Ok(secs) = std::env::var("TURBO_CONNECT_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.connection.connect_timeout_secs = s;
            }
        }

        if let Ok(attempts) = std::env::var("TURBO_TX_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                debug!(max_attempts = n, "Overriding transaction attempts from environment");
                self.transaction.max_attempts = n;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "turbo", "turbo")
            .map(|dirs| dirs.config_dir().join("client.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The normalized store URL.
    pub fn store_url(&self) -> ClientResult<Url> {
        normalize_url(&self.server.url)
    }

    /// Connection timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs)
    }

    /// Keepalive interval as a duration.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.connection.ping_interval_secs)
    }
}

// =============================================================================
// URL Normalization
// =============================================================================

/// Normalizes a store address into a WebSocket URL.
///
/// ## Rules
/// - No scheme: `ws://` is prepended
/// - `http://` / `https://` become `ws://` / `wss://`
/// - A trailing `/` is stripped
/// - Anything else must already be `ws://` or `wss://`
///
/// ## Example
/// ```rust
/// use turbo_sync::config::normalize_url;
///
/// let url = normalize_url("localhost:4000/ws/").unwrap();
/// assert_eq!(url.as_str(), "ws://localhost:4000/ws");
/// ```
pub fn normalize_url(raw: &str) -> ClientResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ClientError::InvalidUrl("store URL is empty".into()));
    }

    let with_scheme = if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("ws://{}", trimmed)
    };

    let stripped = with_scheme.trim_end_matches('/');
    let url = Url::parse(stripped)?;

    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "Store URL must use ws:// or wss://, got: {}",
            raw
        )));
    }

    if url.host_str().is_none() {
        return Err(ClientError::InvalidUrl(format!("Store URL has no host: {}", raw)));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server.url, "ws://localhost:4000/ws");
        assert!(config.connection.auto_connect);
        assert_eq!(config.transaction.max_attempts, 25);
        assert_eq!(config.transaction.initial_backoff(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("localhost:4000").unwrap().as_str(),
            "ws://localhost:4000/"
        );
        assert_eq!(
            normalize_url("http://example.com/ws/").unwrap().as_str(),
            "ws://example.com/ws"
        );
        assert_eq!(
            normalize_url("https://example.com/ws").unwrap().as_str(),
            "wss://example.com/ws"
        );
        assert_eq!(
            normalize_url("wss://example.com/ws").unwrap().as_str(),
            "wss://example.com/ws"
        );

        assert!(normalize_url("").is_err());
        assert!(normalize_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig::for_url("ftp://nope");
        assert!(config.validate().unwrap_err().is_config_error());

        config.server.url = "ws://localhost:4000".into();
        assert!(config.validate().is_ok());

        config.connection.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [transaction]
            max_attempts = 3
            initial_backoff_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.server.url, "ws://localhost:4000/ws");
        assert_eq!(config.transaction.max_attempts, 3);
        assert_eq!(
            config.transaction.initial_backoff(),
            Some(Duration::from_millis(20))
        );
        assert_eq!(config.transaction.max_backoff(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_toml_serialization() {
        let config = ClientConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[transaction]"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("turbo-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("client.toml");

        let mut config = ClientConfig::for_url("ws://store.test:9000/ws");
        config.transaction.max_attempts = 7;
        config.save(Some(path.clone())).unwrap();

        let loaded = ClientConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.transaction.max_attempts, 7);

        std::fs::remove_dir_all(dir).ok();
    }
}
