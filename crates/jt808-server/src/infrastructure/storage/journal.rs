//! Append-only JSON-lines file shared by the telemetry and frame logs.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::application::ports::SinkError;

/// One JSON document per line, appended under a lock.
#[derive(Debug)]
pub struct JsonLinesWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesWriter {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialises `record` and appends it as one line.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Encode`] or [`SinkError::Io`].
    pub async fn append<T: Serialize>(&self, record: &T) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Milliseconds since the Unix epoch; 0 for times before it.
pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
