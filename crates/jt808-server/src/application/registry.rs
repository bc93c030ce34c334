//! SessionRegistry: live connections keyed by peer address.
//!
//! The accept path inserts a [`SessionHandle`] for every connection and the
//! connection's own task removes it on close.  Administrative listing and
//! firmware jobs read the registry concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use jt808_core::protocol::{encode_message, Message, PhoneNumber, ProtocolError, SequenceCounter};
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};

use crate::application::session::SessionSnapshot;

/// Error type for pushing a message to a session.
#[derive(Debug, Error, PartialEq)]
pub enum OutboundError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] ProtocolError),
    /// The connection's writer has stopped.
    #[error("session {0} is closed")]
    Closed(String),
}

/// The connection-side ends of a [`SessionHandle`]'s channels.
#[derive(Debug)]
pub struct SessionChannels {
    /// Encoded frames to write to the socket, in order.
    pub outbound_rx: mpsc::Receiver<Vec<u8>>,
    /// Where the read loop publishes the session's latest state.
    pub snapshot_tx: watch::Sender<SessionSnapshot>,
}

/// Cloneable reference to one live connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    address: String,
    outbound: mpsc::Sender<Vec<u8>>,
    sequence: Arc<SequenceCounter>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Creates a handle plus the channel ends the connection task keeps.
    pub fn new(address: impl Into<String>, queue_depth: usize) -> (Self, SessionChannels) {
        let address = address.into();
        let (outbound, outbound_rx) = mpsc::channel(queue_depth.max(1));
        let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot::connected(address.clone()));
        let handle = Self {
            address,
            outbound,
            sequence: Arc::new(SequenceCounter::new()),
            snapshot,
        };
        (
            handle,
            SessionChannels {
                outbound_rx,
                snapshot_tx,
            },
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Latest published state of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn phone(&self) -> Option<PhoneNumber> {
        self.snapshot.borrow().phone
    }

    /// Sequence number for a platform-initiated message.
    pub fn next_sequence(&self) -> u16 {
        self.sequence.next()
    }

    /// Encodes `msg` and queues it for the connection's writer.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::Encode`] for unencodable messages and
    /// [`OutboundError::Closed`] once the writer has gone away.
    pub async fn send(&self, msg: &Message) -> Result<(), OutboundError> {
        let frame = encode_message(msg)?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| OutboundError::Closed(self.address.clone()))
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Process-wide map of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle`, replacing any stale entry for the same address.
    pub async fn insert(&self, handle: SessionHandle) {
        self.sessions
            .write()
            .await
            .insert(handle.address().to_string(), handle);
    }

    pub async fn remove(&self, address: &str) -> Option<SessionHandle> {
        self.sessions.write().await.remove(address)
    }

    pub async fn get(&self, address: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(address).cloned()
    }

    /// First live session bound to `phone`, by address order.
    pub async fn find_by_phone(&self, phone: &PhoneNumber) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|h| h.phone().as_ref() == Some(phone))
            .min_by(|a, b| a.address.cmp(&b.address))
            .cloned()
    }

    /// Snapshots of every live session, sorted by address.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .await
            .values()
            .map(SessionHandle::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.address.cmp(&b.address));
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
