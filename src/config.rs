//! Configuration module for netpipe
//!
//! Optional JSON file. Every section falls back to its defaults, so `{}` is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Datagram transport settings
    #[serde(default)]
    pub udp: UdpSettings,

    /// Relay driver settings
    #[serde(default)]
    pub relay: RelaySettings,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the transports cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.udp.max_chunk_size == 0 || self.udp.max_chunk_size > MAX_UDP_PAYLOAD {
            return Err(Error::Config(format!(
                "udp.max_chunk_size must be between 1 and {}, got {}",
                MAX_UDP_PAYLOAD, self.udp.max_chunk_size
            )));
        }
        if self.udp.recv_buffer_size == 0 {
            return Err(Error::Config("udp.recv_buffer_size must be positive".into()));
        }
        if self.relay.buffer_size == 0 {
            return Err(Error::Config("relay.buffer_size must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// What a datagram listener does with accept calls after its one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondAcceptPolicy {
    /// Wait until explicitly released (the listener serves a single session)
    #[default]
    Park,
    /// Fail immediately with `Error::AlreadyAccepted`
    Reject,
}

/// What the datagram writer does with transient send failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendErrorPolicy {
    /// Drop the chunk, log it and remember the error
    #[default]
    Drop,
    /// Return the error to the writer
    Propagate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpSettings {
    /// Upper bound on the payload of one outgoing datagram
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Size of the receive buffer; longer datagrams are truncated by the OS
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,

    #[serde(default)]
    pub second_accept: SecondAcceptPolicy,

    #[serde(default)]
    pub send_errors: SendErrorPolicy,
}

fn default_max_chunk_size() -> usize {
    1024
}

fn default_recv_buffer_size() -> usize {
    65_535
}

impl Default for UdpSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            recv_buffer_size: default_recv_buffer_size(),
            second_accept: SecondAcceptPolicy::default(),
            send_errors: SendErrorPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Copy buffer size per direction
    #[serde(default = "default_relay_buffer_size")]
    pub buffer_size: usize,

    /// Abort a direction that has not produced data for this long
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// How long the remaining direction may run once the other one finished
    #[serde(default = "default_linger_millis")]
    pub linger_millis: u64,
}

fn default_relay_buffer_size() -> usize {
    32 * 1024
}

fn default_linger_millis() -> u64 {
    500
}

impl RelaySettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_millis)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            buffer_size: default_relay_buffer_size(),
            idle_timeout_secs: None,
            linger_millis: default_linger_millis(),
        }
    }
}
