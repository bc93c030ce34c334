//! GPS telemetry sink: a `tracing` line per sample, plus an optional
//! JSON-lines file.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::application::ports::{GpsSample, SinkError, TelemetrySink};
use crate::infrastructure::storage::journal::{unix_millis, JsonLinesWriter};

/// On-disk form of a [`GpsSample`].
#[derive(Debug, Serialize)]
struct GpsRecord<'a> {
    imei: &'a str,
    timestamp_ms: u64,
    warn_flags: u32,
    state_flags: u32,
    latitude: u32,
    longitude: u32,
    altitude: u16,
    speed: u16,
    heading: u16,
    ignition_on: bool,
    gps_valid: bool,
}

impl<'a> From<&'a GpsSample> for GpsRecord<'a> {
    fn from(s: &'a GpsSample) -> Self {
        Self {
            imei: &s.imei,
            timestamp_ms: unix_millis(s.received_at),
            warn_flags: s.warn_flags,
            state_flags: s.state_flags,
            latitude: s.latitude,
            longitude: s.longitude,
            altitude: s.altitude,
            speed: s.speed,
            heading: s.heading,
            ignition_on: s.ignition_on,
            gps_valid: s.gps_valid,
        }
    }
}

#[derive(Debug, Default)]
pub struct TelemetryLog {
    journal: Option<JsonLinesWriter>,
}

impl TelemetryLog {
    /// Log-only sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that also appends to `path` when given.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from opening the file.
    pub async fn open(path: Option<&Path>) -> std::io::Result<Self> {
        let journal = match path {
            Some(p) => Some(JsonLinesWriter::open(p).await?),
            None => None,
        };
        Ok(Self { journal })
    }
}

#[async_trait]
impl TelemetrySink for TelemetryLog {
    async fn record_gps_sample(&self, sample: &GpsSample) -> Result<(), SinkError> {
        info!(
            "gps imei={} lat={} lon={} alt={} speed={} heading={} acc={} fix={}",
            sample.imei,
            sample.latitude,
            sample.longitude,
            sample.altitude,
            sample.speed,
            sample.heading,
            sample.ignition_on,
            sample.gps_valid
        );
        if let Some(journal) = &self.journal {
            journal.append(&GpsRecord::from(sample)).await?;
        }
        Ok(())
    }
}
