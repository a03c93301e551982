//! Configuration management for ClipBridge
//!
//! This module handles loading and validating configuration for the bridge.
//! The connection role is an explicit configuration value; the protocol core
//! never inspects platform identity to decide who listens and who dials.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::transport::ConnectionRole;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which side of the pair this process plays
    #[serde(default = "default_role")]
    pub role: ConnectionRole,

    /// UDP port for the discovery query/reply exchange
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// TCP port for the duplex sync channel
    #[serde(default = "default_channel_port")]
    pub channel_port: u16,

    /// Seconds between discovery broadcasts while unconnected
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_secs: u64,

    /// Seconds between heartbeat probes on an open channel
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds allowed for dial plus mutual confirmation
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Retry behavior for failed connection attempts
    #[serde(default)]
    pub retry: RetryConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Backoff configuration for the initiator's connect retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay between attempts, in seconds
    #[serde(default = "default_retry_base")]
    pub base_delay_secs: u64,

    /// Upper bound on the delay, in seconds
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_secs: u64,

    /// Multiplier applied to the delay after each failed attempt
    #[serde(default = "default_retry_multiplier")]
    pub backoff_multiplier: f64,

    /// Attempts per discovered address before returning to discovery
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
}

fn default_role() -> ConnectionRole {
    ConnectionRole::Initiator
}

fn default_discovery_port() -> u16 {
    crate::DEFAULT_DISCOVERY_PORT
}

fn default_channel_port() -> u16 {
    crate::DEFAULT_CHANNEL_PORT
}

fn default_broadcast_interval() -> u64 {
    3
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_retry_base() -> u64 {
    5
}

fn default_retry_max_delay() -> u64 {
    30
}

fn default_retry_multiplier() -> f64 {
    1.5
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_retry_base(),
            max_delay_secs: default_retry_max_delay(),
            backoff_multiplier: default_retry_multiplier(),
            max_attempts: default_retry_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: default_role(),
            discovery_port: default_discovery_port(),
            channel_port: default_channel_port(),
            broadcast_interval_secs: default_broadcast_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            handshake_timeout_secs: default_handshake_timeout(),
            retry: RetryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Default config file location (`~/.config/clipbridge/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("clipbridge").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery_port == 0 || self.channel_port == 0 {
            return Err(ConfigError::Validation(
                "ports must be non-zero".to_string(),
            ));
        }
        if self.discovery_port == self.channel_port {
            return Err(ConfigError::Validation(
                "discovery and channel ports must differ".to_string(),
            ));
        }
        if self.broadcast_interval_secs == 0
            || self.heartbeat_interval_secs == 0
            || self.handshake_timeout_secs == 0
        {
            return Err(ConfigError::Validation(
                "intervals and timeouts must be non-zero".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "retry backoff multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry max_attempts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Discovery broadcast period
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    /// Heartbeat probe period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Dial/handshake deadline
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl RetryConfig {
    /// Initial retry delay
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    /// Retry delay cap
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}
