//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use jt808_core::protocol::{
    encode_message, filter, ids, FilterError, Header, Message, PhoneNumber,
};
use jt808_server::application::admin::AdminService;
use jt808_server::application::firmware::{FirmwareTransfers, TransferPolicy};
use jt808_server::application::registry::SessionRegistry;
use jt808_server::infrastructure::network::{ConnectionContext, ConnectionLimits};
use jt808_server::infrastructure::storage::config::DeviceEntry;
use jt808_server::infrastructure::storage::{FrameLog, StaticDeviceDirectory, TelemetryLog};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const PHONE: &str = "017255111111";

pub fn phone() -> PhoneNumber {
    PhoneNumber::from_digits(PHONE).unwrap()
}

/// A gateway context with log-only sinks plus the admin service over it.
pub fn gateway(devices: &[DeviceEntry]) -> (Arc<ConnectionContext>, Arc<AdminService>) {
    let registry = Arc::new(SessionRegistry::new());
    let transfers = Arc::new(FirmwareTransfers::new(1, TransferPolicy::default()));
    let admin = Arc::new(AdminService::new(
        Arc::clone(&registry),
        Arc::clone(&transfers),
        "v1.0.0",
    ));
    let ctx = Arc::new(ConnectionContext {
        registry,
        transfers,
        directory: Arc::new(StaticDeviceDirectory::from_entries(devices).unwrap()),
        telemetry: Arc::new(TelemetryLog::new()),
        audit: Arc::new(FrameLog::new()),
        limits: ConnectionLimits::default(),
    });
    (ctx, admin)
}

pub fn terminal_frame(message_id: u16, sequence: u16, body: Vec<u8>) -> Vec<u8> {
    let msg = Message {
        header: Header {
            message_id,
            encryption: 0,
            versioned: false,
            protocol_version: 0,
            phone: phone(),
            sequence,
            packet: None,
        },
        body,
    };
    encode_message(&msg).unwrap()
}

pub fn heartbeat(sequence: u16) -> Vec<u8> {
    terminal_frame(ids::HEARTBEAT, sequence, Vec::new())
}

pub fn segment_ack(sequence: u16, acked_sequence: u16) -> Vec<u8> {
    let mut body = acked_sequence.to_be_bytes().to_vec();
    body.extend_from_slice(&ids::FIRMWARE_UPDATE.to_be_bytes());
    body.push(0);
    terminal_frame(ids::TERMINAL_ACK, sequence, body)
}

pub fn login_body(auth_key: &str, imei: &str, version: &str) -> Vec<u8> {
    let mut body = vec![auth_key.len() as u8];
    body.extend_from_slice(auth_key.as_bytes());
    body.extend_from_slice(imei.as_bytes());
    let mut padded = version.as_bytes().to_vec();
    padded.resize(20, 0);
    body.extend_from_slice(&padded);
    body
}

/// Waits until the registry has published a session bound to [`phone`].
pub async fn wait_for_binding(admin: &AdminService) {
    for _ in 0..100 {
        if admin
            .list_sessions()
            .await
            .iter()
            .any(|s| s.phone == Some(phone()))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never bound to {PHONE}");
}

/// Terminal-side reader that turns the platform's byte stream back into
/// messages.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    pending: VecDeque<Message>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Next message, or `None` if nothing arrives within `wait`.
    pub async fn next_within(&mut self, wait: Duration) -> Option<Message> {
        tokio::time::timeout(wait, self.next()).await.ok()
    }

    /// Next message; panics on EOF.
    pub async fn next(&mut self) -> Message {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return msg;
            }
            let mut chunk = [0u8; 2048];
            let n = self.inner.read(&mut chunk).await.unwrap();
            assert!(n > 0, "platform closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
            let (frames, consumed) = match filter(&self.buf) {
                Ok(outcome) => (outcome.frames, outcome.consumed),
                Err(FilterError::TooManyFrames {
                    frames, consumed, ..
                }) => (frames, consumed),
            };
            self.buf.drain(..consumed);
            self.pending.extend(frames.into_iter().map(|f| f.message));
        }
    }
}
