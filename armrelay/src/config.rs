/*!
Configuration management for the relay.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub serial: SerialConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

/// How client bytes are split into commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One socket read is one command; trailing bytes are ignored
    #[default]
    ReadBoundary,
    /// Commands are split by header and may span reads
    Stream,
}

/// Network side of the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// TCP bind address
    pub bind_addr: String,

    /// TCP port to listen on
    pub port: u16,

    /// Listen backlog
    pub backlog: i32,

    /// Size of the per-read client buffer
    pub read_buffer_size: usize,

    /// Command framing mode
    pub framing: Framing,

    /// Send `error: ...` to the client for rejected commands
    pub reply_on_error: bool,

    /// Close a connection after this many silent seconds (unset = never)
    pub idle_timeout_secs: Option<u64>,
}

impl RelayConfig {
    pub fn socket_addr(&self) -> crate::error::Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_addr
            .parse()
            .map_err(|_| RelayError::config(format!("invalid bind address: {}", self.bind_addr)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 6657,
            backlog: 10,
            read_buffer_size: 1024,
            framing: Framing::ReadBoundary,
            reply_on_error: false,
            idle_timeout_secs: None,
        }
    }
}

/// Controller side of the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device the controller is attached to
    pub device: String,

    /// Log frames instead of opening the device
    pub dry_run: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            dry_run: false,
        }
    }
}
