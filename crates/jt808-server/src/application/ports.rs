//! Collaborator seams: device metadata, telemetry persistence, frame audit.
//!
//! Infrastructure supplies the real implementations (see
//! `infrastructure::storage`); unit tests use the `mockall` mocks generated
//! here.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use jt808_core::PhoneNumber;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for telemetry and audit persistence.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Out-of-band provisioned metadata for one terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Key issued to the terminal in the register ack and checked at login.
    pub auth_key: String,
    /// IMEI the terminal is expected to report at login.
    pub imei: Option<String>,
    pub vin: Option<String>,
    pub iccid: Option<String>,
}

impl DeviceRecord {
    /// `true` when an IMEI is provisioned and `reported` differs from it.
    pub fn imei_conflicts(&self, reported: &str) -> bool {
        self.imei.as_deref().is_some_and(|expected| expected != reported)
    }
}

/// One GPS report as handed to the telemetry sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsSample {
    pub imei: String,
    pub received_at: SystemTime,
    pub warn_flags: u32,
    pub state_flags: u32,
    pub latitude: u32,
    pub longitude: u32,
    pub altitude: u16,
    pub speed: u16,
    pub heading: u16,
    pub ignition_on: bool,
    pub gps_valid: bool,
}

/// Which way a physical frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("<---"),
            Direction::Outbound => f.write_str("--->"),
        }
    }
}

/// Lookup of provisioned device metadata.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Returns the record for the raw 10-byte phone field, if provisioned.
    async fn lookup_by_phone(&self, phone: &PhoneNumber) -> Option<DeviceRecord>;
}

/// Destination for parsed GPS reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record_gps_sample(&self, sample: &GpsSample) -> Result<(), SinkError>;
}

/// Receives every inbound and outbound physical frame as upper-case hex.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameAudit: Send + Sync {
    async fn log_frame(&self, direction: Direction, at: SystemTime, hex_frame: &str);
}
