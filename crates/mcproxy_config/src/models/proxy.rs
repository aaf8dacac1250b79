use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::logging::{LogType, LoggingConfig};
use crate::error::ConfigError;

/// Largest chunk payload a single `map_chunk` packet may carry before the
/// column is split.
pub const DEFAULT_CHUNK_SPLIT_THRESHOLD: usize = 31598;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Forward the original bytes when no middleware touched the fields
    #[serde(default = "default_true")]
    pub optimize_packet_write: bool,

    #[serde(default)]
    pub coordinate_offset: Option<OffsetConfig>,

    #[serde(default)]
    pub sync_marker: SyncMarkerConfig,

    #[serde(default = "default_chunk_split_threshold")]
    pub chunk_split_threshold: usize,

    /// Packets the proxy's own writes may still send upstream while a
    /// client is linked
    #[serde(default = "default_keep_alive_whitelist")]
    pub keep_alive_whitelist: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Default)]
pub struct OffsetConfig {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SyncMarkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Forwarded packets between two markers
    #[serde(default = "default_every_packets")]
    pub every_packets: u32,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
}

fn default_true() -> bool {
    true
}

fn default_every_packets() -> u32 {
    20
}

fn default_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_chunk_split_threshold() -> usize {
    DEFAULT_CHUNK_SPLIT_THRESHOLD
}

fn default_keep_alive_whitelist() -> Vec<String> {
    vec!["keep_alive".to_string()]
}

impl Default for SyncMarkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_packets: default_every_packets(),
            interval: default_interval(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            optimize_packet_write: true,
            coordinate_offset: None,
            sync_marker: SyncMarkerConfig::default(),
            chunk_split_threshold: DEFAULT_CHUNK_SPLIT_THRESHOLD,
            keep_alive_whitelist: default_keep_alive_whitelist(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ProxyConfig = serde_yml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            log_type = LogType::Config.as_str(),
            path = %path.display(),
            "Loading proxy configuration"
        );
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_split_threshold == 0 {
            return Err(ConfigError::Invalid(
                "chunk_split_threshold must be greater than zero".to_string(),
            ));
        }
        if self.sync_marker.enabled && self.sync_marker.every_packets == 0 {
            return Err(ConfigError::Invalid(
                "sync_marker.every_packets must be greater than zero".to_string(),
            ));
        }
        if self.sync_marker.enabled && self.sync_marker.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sync_marker.interval must not be zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Overrides every field `other` sets away from its default.
    pub fn merge(&mut self, other: ProxyConfig) {
        let defaults = ProxyConfig::default();

        if other.optimize_packet_write != defaults.optimize_packet_write {
            self.optimize_packet_write = other.optimize_packet_write;
        }

        if other.coordinate_offset.is_some() {
            self.coordinate_offset = other.coordinate_offset;
        }

        if other.sync_marker != defaults.sync_marker {
            self.sync_marker = other.sync_marker;
        }

        if other.chunk_split_threshold != defaults.chunk_split_threshold {
            self.chunk_split_threshold = other.chunk_split_threshold;
        }

        if other.keep_alive_whitelist != defaults.keep_alive_whitelist {
            self.keep_alive_whitelist = other.keep_alive_whitelist;
        }

        self.logging = other.logging;
    }
}
