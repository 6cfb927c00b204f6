//! Configuration management for chatter
//!
//! Defaults, an optional TOML file and `CHATTER_<SECTION>_<KEY>` environment
//! overrides, validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// gRPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// How long to wait for in-flight calls after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Messages buffered per live subscription before the sender waits
    pub subscription_buffer: usize,
}

/// Which store backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!("Unknown store backend: {}", other))),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database file (sqlite backend only)
    pub path: PathBuf,

    /// Maximum pooled connections (sqlite backend only)
    pub pool_size: u32,

    /// Drop every row at start-up
    pub clear_on_start: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter
    pub enabled: bool,

    /// Exporter bind address
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 50051)),
            shutdown_timeout: Duration::from_secs(10),
            subscription_buffer: 64,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("./data/chatter.db"),
            pool_size: 8,
            clear_on_start: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

/// Parse one environment override, if present
fn env_override<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    ///
    /// Example: `CHATTER_SERVER_BIND_ADDRESS=0.0.0.0:50051`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `CHATTER_*` environment overrides in place
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(addr) = env_override("CHATTER_SERVER_BIND_ADDRESS")? {
            self.server.bind_address = addr;
        }
        if let Some(timeout) =
            env_override::<humantime_serde::re::humantime::Duration>("CHATTER_SERVER_SHUTDOWN_TIMEOUT")?
        {
            self.server.shutdown_timeout = timeout.into();
        }
        if let Some(buffer) = env_override("CHATTER_SERVER_SUBSCRIPTION_BUFFER")? {
            self.server.subscription_buffer = buffer;
        }

        if let Some(backend) = env_override("CHATTER_STORE_BACKEND")? {
            self.store.backend = backend;
        }
        if let Ok(path) = env::var("CHATTER_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(pool_size) = env_override("CHATTER_STORE_POOL_SIZE")? {
            self.store.pool_size = pool_size;
        }
        if let Some(clear) = env_override("CHATTER_STORE_CLEAR_ON_START")? {
            self.store.clear_on_start = clear;
        }

        if let Ok(level) = env::var("CHATTER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_override("CHATTER_LOG_JSON")? {
            self.logging.json_format = json;
        }

        if let Some(enabled) = env_override("CHATTER_METRICS_ENABLED")? {
            self.metrics.enabled = enabled;
        }
        if let Some(addr) = env_override("CHATTER_METRICS_BIND_ADDRESS")? {
            self.metrics.bind_address = addr;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.subscription_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "subscription_buffer must be greater than 0".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Sqlite {
            if self.store.pool_size == 0 {
                return Err(ConfigError::ValidationFailed(
                    "pool_size must be greater than 0".to_string(),
                ));
            }
            if self.store.path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "sqlite backend requires a database path".to_string(),
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        if self.metrics.enabled && self.metrics.bind_address == self.server.bind_address {
            return Err(ConfigError::ValidationFailed(
                "metrics and server cannot share a bind address".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
