use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ObserverConfig {
    /// UDP address the mesh gateway forwards datagrams to.
    pub listen: SocketAddr,

    /// Seconds a reporting node stays active without being heard from.
    pub timeout_secs: u64,

    /// Interval between sweep/snapshot rounds.
    pub sweep_interval_ms: u64,

    pub recv_buffer_size: usize,

    /// Sliding window for per-node traffic rates.
    pub rate_window_secs: u32,

    /// Where postcard-encoded snapshots are sent, if anywhere. Each snapshot
    /// is one datagram, so meshes whose snapshot encodes past 64 KiB are not
    /// published here.
    pub snapshot_target: Option<SocketAddr>,

    pub log_level: String,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        ObserverConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            timeout_secs: 8,
            sweep_interval_ms: 1000,
            recv_buffer_size: 1024,
            rate_window_secs: 5,
            snapshot_target: None,
            log_level: "info".to_string(),
        }
    }
}

impl ObserverConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be > 0".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be > 0".into()));
        }
        if self.rate_window_secs == 0 {
            return Err(ConfigError::Invalid("rate_window_secs must be > 0".into()));
        }
        if self.recv_buffer_size < common::FRAME_PREFIX_SIZE {
            return Err(ConfigError::Invalid(format!(
                "recv_buffer_size must hold at least {} bytes",
                common::FRAME_PREFIX_SIZE
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
