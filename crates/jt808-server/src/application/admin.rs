//! AdminService: operator entry points used by the console.
//!
//! Resolves a target terminal by phone number through the
//! [`SessionRegistry`] and then talks to it through its
//! [`crate::application::registry::SessionHandle`].

use std::path::Path;
use std::sync::Arc;

use jt808_core::protocol::{ids, ControlRequest, Message, PhoneNumber};
use thiserror::Error;
use tracing::info;

use crate::application::firmware::{FirmwareTransfers, TransferError, TransferTicket};
use crate::application::registry::{OutboundError, SessionRegistry};
use crate::application::session::SessionSnapshot;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("no live session for phone {0}")]
    SessionNotFound(PhoneNumber),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Outbound(#[from] OutboundError),
}

pub struct AdminService {
    registry: Arc<SessionRegistry>,
    transfers: Arc<FirmwareTransfers>,
    default_version: String,
}

impl AdminService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transfers: Arc<FirmwareTransfers>,
        default_version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            transfers,
            default_version: default_version.into(),
        }
    }

    /// Read-only snapshots of every live session.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.registry.list().await
    }

    /// Pushes the firmware image at `path` to the terminal bound to `phone`.
    ///
    /// The transfer runs in the background; the returned ticket can be
    /// awaited or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::SessionNotFound`] when no live session is bound to
    /// `phone`, and [`AdminError::Transfer`] when the transfer cannot start.
    pub async fn start_firmware_update(
        &self,
        phone: &PhoneNumber,
        path: &Path,
        version: Option<&str>,
    ) -> Result<TransferTicket, AdminError> {
        let session = self
            .registry
            .find_by_phone(phone)
            .await
            .ok_or(AdminError::SessionNotFound(*phone))?;
        let version = version.unwrap_or(&self.default_version);
        let ticket = self
            .transfers
            .start_from_file(session, path, version)
            .await?;
        info!("firmware update {} queued for {phone} from {}", ticket.id, path.display());
        Ok(ticket)
    }

    /// Sends a terminal control request (`0x8105`).
    ///
    /// Returns the sequence number used.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::SessionNotFound`] or [`AdminError::Outbound`].
    pub async fn send_control(
        &self,
        phone: &PhoneNumber,
        command: u8,
        param: &str,
    ) -> Result<u16, AdminError> {
        let session = self
            .registry
            .find_by_phone(phone)
            .await
            .ok_or(AdminError::SessionNotFound(*phone))?;
        let sequence = session.next_sequence();
        let body = ControlRequest {
            command,
            param: param.to_string(),
        }
        .encode();
        session
            .send(&Message::platform(ids::CONTROL_REQUEST, *phone, sequence, body))
            .await?;
        info!("control {command} sent to {phone} (seq {sequence})");
        Ok(sequence)
    }
}
