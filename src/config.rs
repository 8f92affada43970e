//! Channel configuration
//!
//! Loaded from JSON; every field is optional and falls back to the defaults
//! below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::TlsConfig;

/// Default size of a single raw read (8 KiB)
pub const DEFAULT_MAX_READ_CHUNK: usize = 8 * 1024;

/// Default read/write deadline in seconds
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 60;

/// Default capacity of the write queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default TCP keep-alive probe interval in seconds
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;

/// What a writer does when the write queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Wait until the write loop frees a slot
    #[default]
    Block,
    /// Fail with `Error::QueueFull`
    Reject,
}

/// Tunables of a single Channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Size of each raw socket read
    pub max_read_chunk: usize,
    /// Read deadline, re-armed before every read
    pub read_timeout_secs: u64,
    /// Write deadline, re-armed before every write
    pub write_timeout_secs: u64,
    /// Bound of the write queue
    pub queue_capacity: usize,
    /// Behavior of writers on a full queue
    pub queue_policy: QueuePolicy,
    /// TCP keep-alive probe interval; 0 disables keep-alive
    pub keep_alive_secs: u64,
    /// TLS settings used by the demo binary
    pub tls: Option<TlsConfig>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_read_chunk: DEFAULT_MAX_READ_CHUNK,
            read_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_policy: QueuePolicy::Block,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            tls: None,
        }
    }
}

impl ChannelConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values a Channel cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_read_chunk == 0 {
            return Err(Error::Config("max_read_chunk must be greater than 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be greater than 0".into()));
        }
        if self.read_timeout_secs == 0 {
            return Err(Error::Config("read_timeout_secs must be greater than 0".into()));
        }
        if self.write_timeout_secs == 0 {
            return Err(Error::Config("write_timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    /// Read deadline, never shorter than one second.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }

    /// Write deadline, never shorter than one second.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }
}
