//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SerialConfig: device path and baud rate of the sensor node.
//!     - AggregationConfig: idle timeout and ticker period for partial flushes.
//!     - ReconnectConfig: retry interval, retry budget and long cooldown.
//!     - StorageConfig: primary store url, fallback capacity and snapshot dir.
//!     - ServerConfig / PublisherConfig / LoggingConfig.
//!
//!     every section and field has a default, so a partial file is fine.
//! ```
//!
//! ==============================================================================

use crate::link::ReconnectPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub serial: SerialConfig,
    pub aggregation: AggregationConfig,
    pub reconnect: ReconnectConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub publisher: PublisherConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    /// empty means "no link": the host still serves queries
    pub device_path: String,
    pub baud_rate: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    pub idle_timeout_seconds: u64,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub retry_interval_seconds: u64,
    pub max_retry_attempts: u32,
    pub cooldown_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// base url of the primary document store; unset = fallback only
    pub primary_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub fallback_capacity: usize,
    pub snapshot_dir: PathBuf,
    pub reconcile_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 5,
            tick_interval_ms: 1000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_interval_seconds: 30,
            max_retry_attempts: 10,
            cooldown_seconds: 300,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary_url: None,
            request_timeout_seconds: 5,
            fallback_capacity: 100,
            snapshot_dir: PathBuf::from("data"),
            reconcile_interval_seconds: 60,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

/// where the active configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Defaults,
    /// a file was found but could not be used; defaults are active
    Rejected { path: PathBuf, error: String },
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        Ok(config)
    }

    /// Load with default fallback.
    ///
    /// runs before logging is set up, so the origin is returned for the
    /// caller to report.
    pub fn load_or_default() -> (Self, ConfigOrigin) {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return match Self::load(path) {
                    Ok(config) => (config, ConfigOrigin::File(path.clone())),
                    Err(e) => (
                        Self::default(),
                        ConfigOrigin::Rejected {
                            path: path.clone(),
                            error: e.to_string(),
                        },
                    ),
                };
            }
        }

        (Self::default(), ConfigOrigin::Defaults)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            retry_interval: Duration::from_secs(self.reconnect.retry_interval_seconds),
            max_attempts: self.reconnect.max_retry_attempts,
            cooldown: Duration::from_secs(self.reconnect.cooldown_seconds),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregation.idle_timeout_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.aggregation.tick_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.request_timeout_seconds.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.storage.reconcile_interval_seconds.max(1))
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│           HOST CONFIGURATION            │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Device: {} @ {} baud", self.serial.device_path, self.serial.baud_rate);
        tracing::info!("│ Idle Timeout: {}s", self.aggregation.idle_timeout_seconds);
        tracing::info!(
            "│ Reconnect: every {}s, {} tries, then {}s cooldown",
            self.reconnect.retry_interval_seconds,
            self.reconnect.max_retry_attempts,
            self.reconnect.cooldown_seconds
        );
        tracing::info!(
            "│ Primary Store: {}",
            self.storage.primary_url.as_deref().unwrap_or("(none, fallback only)")
        );
        tracing::info!(
            "│ Fallback: {} records in {}",
            self.storage.fallback_capacity,
            self.storage.snapshot_dir.display()
        );
        tracing::info!("│ Server: {}", self.server.bind_address);
        tracing::info!("│ Log Level: {}", self.logging.level);
        tracing::info!("└─────────────────────────────────────────┘");
    }
}
