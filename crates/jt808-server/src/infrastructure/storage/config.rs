//! TOML configuration for the gateway.
//!
//! Every field is optional; a missing file yields [`AppConfig::default`].
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 19902
//!
//! [firmware]
//! version = "v1.0.0"
//! max_concurrent_transfers = 1
//!
//! [[devices]]
//! phone = "017255111111"
//! auth_key = "AUTH-1"
//! ```
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take `some_fn()` when
//! absent, so older files keep loading as new settings are added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::firmware::{TransferPolicy, DEFAULT_FIRMWARE_VERSION};
use crate::infrastructure::network::ConnectionLimits;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub firmware: FirmwareConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Out-of-band provisioned terminals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceEntry>,
}

/// Listener and per-connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bytes requested per socket read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Buffered bytes without a complete frame above which the buffer is dropped.
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
    /// Close connections idle for this long.  Absent means never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_secs: Option<u64>,
}

/// Firmware push settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirmwareConfig {
    /// Version string written into the update preamble.
    #[serde(default = "default_firmware_version")]
    pub version: String,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// Sleep after segment 1 instead of waiting for its ack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_segment_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// JSON-lines file for GPS samples.  Absent means log only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_path: Option<PathBuf>,
    /// JSON-lines file for raw frames.  Absent means log only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_path: Option<PathBuf>,
}

/// One provisioned terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    /// BCD digits as they appear on the wire, e.g. `"017255111111"`.
    pub phone: String,
    pub auth_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    19902
}
fn default_read_buffer_size() -> usize {
    1024
}
fn default_max_pending_bytes() -> usize {
    64 * 1024
}
fn default_firmware_version() -> String {
    DEFAULT_FIRMWARE_VERSION.to_string()
}
fn default_max_concurrent_transfers() -> usize {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            read_buffer_size: default_read_buffer_size(),
            max_pending_bytes: default_max_pending_bytes(),
            read_timeout_secs: None,
        }
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            version: default_firmware_version(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            first_segment_delay_ms: None,
            ack_timeout_secs: None,
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

// ── Conversions ───────────────────────────────────────────────────────────────

impl ServerConfig {
    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            read_buffer_size: self.read_buffer_size,
            max_pending_bytes: self.max_pending_bytes,
            read_timeout: self.read_timeout_secs.map(Duration::from_secs),
            ..ConnectionLimits::default()
        }
    }
}

impl FirmwareConfig {
    pub fn transfer_policy(&self) -> TransferPolicy {
        TransferPolicy {
            first_segment_delay: self.first_segment_delay_ms.map(Duration::from_millis),
            ack_timeout: self.ack_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl AppConfig {
    /// Rejects values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("server.read_buffer_size must be > 0".into()));
        }
        if self.server.max_pending_bytes < self.server.read_buffer_size {
            return Err(ConfigError::Invalid(
                "server.max_pending_bytes must be >= server.read_buffer_size".into(),
            ));
        }
        if self.firmware.max_concurrent_transfers == 0 {
            return Err(ConfigError::Invalid(
                "firmware.max_concurrent_transfers must be >= 1".into(),
            ));
        }
        if self.firmware.version.len() > usize::from(u8::MAX) {
            return Err(ConfigError::Invalid("firmware.version longer than 255 bytes".into()));
        }
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
