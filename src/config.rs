//! Application configuration loaded from `config.yaml` plus environment
//! overrides.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// Server configuration (host, port, CORS origins)
    #[serde(default)]
    pub server: ServerConfig,
    /// Cache connection and freshness settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Snapshot store location
    #[serde(default)]
    pub store: StoreConfig,
    /// Symbols treated as USD stablecoins by the pair locator
    #[serde(default = "default_stablecoins")]
    pub stablecoins: Vec<String>,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Server configuration settings.
#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on (default: 3010)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Comma-separated list of allowed CORS origins (default: "*")
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,
}

/// Redis connection settings.
#[derive(Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL; caching and pub/sub run in-process when absent
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Consecutive failures before the connection is suspended
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// First suspension length in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Suspension cap in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Per-operation timeout in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the JSON snapshot collections
    #[serde(default = "default_data_path")]
    pub data_path: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RepairConfig {
    /// Max distance between a price snapshot and the reserve snapshot used
    /// to rebuild it before falling back to the nearest available one
    #[serde(default = "default_reserve_tolerance_secs")]
    pub reserve_tolerance_secs: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EventsConfig {
    /// Keep-alive interval for event streams
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Buffered messages per streaming client before it starts skipping
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Reconnect delay advised to clients while the cache is suspended
    #[serde(default = "default_retry_ms")]
    pub degraded_retry_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3010
}
fn default_allowed_origins() -> String {
    "*".to_string()
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_operation_timeout_ms() -> u64 {
    500
}
fn default_data_path() -> String {
    "data".to_string()
}
fn default_reserve_tolerance_secs() -> i64 {
    60
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_channel_capacity() -> usize {
    256
}
fn default_retry_ms() -> u64 {
    5_000
}

pub fn default_stablecoins() -> Vec<String> {
    ["USDC", "USDT", "DAI", "BUSD", "TUSD", "USDP", "FRAX", "LUSD", "USDC.E"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            stablecoins: default_stablecoins(),
            repair: RepairConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            failure_threshold: default_failure_threshold(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            reserve_tolerance_secs: default_reserve_tolerance_secs(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            channel_capacity: default_channel_capacity(),
            degraded_retry_ms: default_retry_ms(),
        }
    }
}

impl CacheConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl AppConfig {
    /// Read and parse a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read {} - ensure file exists in working directory",
                path.display()
            )
        })?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse {} - check YAML syntax and structure", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply `REDIS_URL`, `PORT` and `DATA_PATH` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            if !url.trim().is_empty() {
                self.cache.redis_url = Some(url);
            }
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("DATA_PATH") {
            self.store.data_path = path;
        }
    }
}
