// src/settings.rs
//
// Bridge configuration. Built from defaults, an optional TOML file and CLI overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::{IoError, Parity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Blocking read timeout; bounds how long a stop request can go unnoticed
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpSettings {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Maximum accumulators alive per session (also the notification channel capacity)
    #[serde(default = "default_pool_limit")]
    pub pool_limit: usize,
    /// Serial read size for the downstream parser
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// TCP read size for the upstream copy loop
    #[serde(default = "default_upstream_chunk_size")]
    pub upstream_chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub tcp: TcpSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Mirror log output to a timestamped file in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Hex-dump upstream traffic and report dropped noise bytes
    #[serde(default)]
    pub verbose: bool,
}

fn default_serial_port() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_baud_rate() -> u32 {
    1_500_000
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    50
}
fn default_listen_port() -> u16 {
    7788
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_pool_limit() -> usize {
    10
}
fn default_read_chunk_size() -> usize {
    1024
}
fn default_upstream_chunk_size() -> usize {
    128
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pool_limit: default_pool_limit(),
            read_chunk_size: default_read_chunk_size(),
            upstream_chunk_size: default_upstream_chunk_size(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            tcp: TcpSettings::default(),
            pipeline: PipelineSettings::default(),
            log_dir: None,
            verbose: false,
        }
    }
}

/// `<config_dir>/ser2tcp/config.toml`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ser2tcp").join("config.toml"))
}

impl BridgeSettings {
    pub fn from_toml_str(contents: &str) -> Result<Self, IoError> {
        toml::from_str(contents)
            .map_err(|e| IoError::configuration(format!("Failed to parse settings: {}", e)))
    }

    pub fn load_from(path: &Path) -> Result<Self, IoError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            IoError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load an explicit settings file, or the default one if it exists, or defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, IoError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tlog!("[settings] Loading {}", path.display());
                Self::load_from(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), IoError> {
        if self.serial.port.trim().is_empty() {
            return Err(IoError::configuration("serial port must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(IoError::configuration("baud rate must be positive"));
        }
        // One buffer is always held by the parser, so a flush needs a second
        if self.pipeline.pool_limit < 2 {
            return Err(IoError::configuration(format!(
                "pool limit must be at least 2 (got {})",
                self.pipeline.pool_limit
            )));
        }
        if self.pipeline.read_chunk_size == 0 || self.pipeline.upstream_chunk_size == 0 {
            return Err(IoError::configuration("chunk sizes must be positive"));
        }
        Ok(())
    }
}
