//! Raw frame audit: every physical frame in both directions as hex.

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::ports::{Direction, FrameAudit};
use crate::infrastructure::storage::journal::{unix_millis, JsonLinesWriter};

#[derive(Debug, Serialize)]
struct FrameRecord<'a> {
    timestamp_ms: u64,
    direction: Direction,
    frame: &'a str,
}

#[derive(Debug, Default)]
pub struct FrameLog {
    journal: Option<JsonLinesWriter>,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

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
impl FrameAudit for FrameLog {
    async fn log_frame(&self, direction: Direction, at: SystemTime, hex_frame: &str) {
        debug!("{direction} {hex_frame}");
        let Some(journal) = &self.journal else {
            return;
        };
        let record = FrameRecord {
            timestamp_ms: unix_millis(at),
            direction,
            frame: hex_frame,
        };
        // Audit write failures are logged, never propagated.
        if let Err(e) = journal.append(&record).await {
            warn!("frame audit write to {} failed: {e}", journal.path().display());
        }
    }
}
