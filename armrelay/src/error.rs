/*!
Error types for the relay.
*/

use std::net::SocketAddr;
use thiserror::Error;

/// Result type used throughout the relay
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The serial device could not be opened
    #[error("Serial device {path} unavailable: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// Line parameters could not be applied
    #[error("Failed to configure serial line: {0}")]
    SerialConfig(#[source] serialport::Error),

    /// The listening socket could not be set up
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The controller accepted fewer bytes than a full frame
    #[error("Short serial write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// I/O errors (sockets, serial writes)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn device_unavailable(path: impl Into<String>, source: serialport::Error) -> Self {
        Self::DeviceUnavailable {
            path: path.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the relay cannot continue after this error
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable { .. } | Self::SerialConfig(_) | Self::Bind { .. } | Self::Config(_)
        )
    }
}
