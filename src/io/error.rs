// src/io/error.rs
//
// Typed errors for the serial and TCP endpoints and the downstream pipeline.

use thiserror::Error;

/// Error raised by a bridge endpoint or the pipeline between them.
///
/// Every variant carries the device label (`serial(/dev/ttyUSB0)`, `tcp(10.0.0.2:51012)`, ...)
/// so log lines name the endpoint that failed.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    #[error("{device}: write failed: {message}")]
    Write { device: String, message: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Free set empty and allocation cap reached while the parser needed a new buffer.
    #[error("buffer pool exhausted: all {limit} buffers in use")]
    PoolExhausted { limit: usize },
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
