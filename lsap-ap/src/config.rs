//! Configuration for the lsap-ap playback engine
//!
//! Loaded from a TOML file (see `lsap_common::config` for path resolution).
//! Every field has a built-in default, so an empty or missing file yields a
//! working engine:
//!
//! ```toml
//! [queue]
//! max_count = 50
//! max_memory_bytes = 52428800
//!
//! [pool]
//! max_size = 20
//!
//! [decode]
//! max_time_ms = 100
//! min_chunk_bytes = 1
//! max_chunk_bytes = 1048576
//!
//! [telemetry]
//! health_check_interval_ms = 1000
//!
//! [output]
//! device = "default"
//! start_suspended = false
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Playback queue limits
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of queued buffers
    #[serde(default = "default_queue_max_count")]
    pub max_count: usize,

    /// Maximum estimated memory of queued buffers
    #[serde(default = "default_queue_max_memory_bytes")]
    pub max_memory_bytes: u64,
}

/// Buffer pool limits
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of recycled sample buffers kept
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
}

/// Decode pipeline limits
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DecodeConfig {
    /// Baseline decode time above which a decode is reported as slow
    #[serde(default = "default_decode_max_time_ms")]
    pub max_time_ms: u64,

    /// Smallest accepted chunk
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: usize,

    /// Largest accepted chunk
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

/// Health monitoring
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Interval between health/quality evaluations
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

/// Output device selection
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// Output device name (None = system default)
    #[serde(default)]
    pub device: Option<String>,

    /// Open the device suspended; playback waits for `activate()`
    #[serde(default)]
    pub start_suspended: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_queue_max_count() -> usize {
    50
}

fn default_queue_max_memory_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_pool_max_size() -> usize {
    20
}

fn default_decode_max_time_ms() -> u64 {
    100
}

fn default_min_chunk_bytes() -> usize {
    1
}

fn default_max_chunk_bytes() -> usize {
    1024 * 1024
}

fn default_health_check_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_count: default_queue_max_count(),
            max_memory_bytes: default_queue_max_memory_bytes(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_time_ms: default_decode_max_time_ms(),
            min_chunk_bytes: default_min_chunk_bytes(),
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl DecodeConfig {
    /// Baseline maximum decode time as Duration
    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_time_ms)
    }
}

impl TelemetryConfig {
    /// Health check interval as Duration
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML path, then validate
    ///
    /// With no path, built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: EngineConfig = lsap_common::config::load_or_default(path)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, then validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_count == 0 {
            return Err(Error::Config("queue.max_count must be greater than 0".to_string()));
        }
        if self.queue.max_memory_bytes == 0 {
            return Err(Error::Config("queue.max_memory_bytes must be greater than 0".to_string()));
        }
        if self.decode.max_time_ms == 0 {
            return Err(Error::Config("decode.max_time_ms must be greater than 0".to_string()));
        }
        if self.decode.min_chunk_bytes > self.decode.max_chunk_bytes {
            return Err(Error::Config(format!(
                "decode.min_chunk_bytes ({}) exceeds decode.max_chunk_bytes ({})",
                self.decode.min_chunk_bytes, self.decode.max_chunk_bytes
            )));
        }
        if self.telemetry.health_check_interval_ms == 0 {
            return Err(Error::Config(
                "telemetry.health_check_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
