//! FirmwareTransfer: segmented, ack-gated firmware push over `0x8108`.
//!
//! Each segment is a multi-packet message carrying at most [`SEGMENT_SIZE`]
//! body bytes.  Segment 1 starts with the [`UpdatePreamble`]; the payload
//! follows immediately and flows on into later segments.
//!
//! Pacing: after each segment the driver waits for the terminal's generic
//! ack of `0x8108` naming that segment's sequence number, which the
//! connection's read loop forwards through [`FirmwareTransfers::acknowledge`].  With
//! [`TransferPolicy::first_segment_delay`] set, segment 1 is instead followed
//! by a fixed delay, matching terminals that never ack the first segment.
//!
//! The driver runs on its own task so that waiting for an ack never blocks
//! the read loop that delivers it.  Ack channels are keyed by connection
//! address; concurrency across connections is bounded by a semaphore.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use jt808_core::protocol::{
    ids, Header, Message, PacketInfo, PhoneNumber, TerminalAck, UpdatePreamble,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::registry::SessionHandle;

/// Body bytes per segment.
pub const SEGMENT_SIZE: usize = 1023;

/// Version string written into the preamble when none is given.
pub const DEFAULT_FIRMWARE_VERSION: &str = "v1.0.0";

/// Acks buffered per transfer before extra ones are dropped.
const ACK_QUEUE_DEPTH: usize = 8;

/// Error type for firmware transfers.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot open firmware image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("firmware payload of {0} bytes does not fit the segment counters")]
    TooLarge(u64),
    #[error("all {capacity} transfer slot(s) are busy")]
    Busy { capacity: usize },
    #[error("a transfer to {0} is already running")]
    AlreadyActive(String),
    #[error("session {0} has not identified itself yet")]
    PhoneUnknown(String),
    #[error("reading segment {segment} failed: {source}")]
    SourceRead {
        segment: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("payload ended early while filling segment {segment}")]
    SourceTruncated { segment: u16 },
    #[error("session closed before segment {segment} was sent")]
    SessionClosed { segment: u16 },
    #[error("no ack for segment {segment} within {timeout:?}")]
    AckTimeout { segment: u16, timeout: Duration },
    #[error("transfer cancelled while waiting for ack of segment {segment}")]
    Cancelled { segment: u16 },
}

// ── Segment planning ──────────────────────────────────────────────────────────

/// How a payload is split into segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    preamble: UpdatePreamble,
    total: u16,
}

impl SegmentPlan {
    /// # Errors
    ///
    /// Returns [`TransferError::TooLarge`] when the payload length does not
    /// fit the 32-bit preamble field or needs more than `u16::MAX` segments.
    pub fn new(version: &str, payload_len: u64) -> Result<Self, TransferError> {
        let len32 = u32::try_from(payload_len).map_err(|_| TransferError::TooLarge(payload_len))?;
        let preamble = UpdatePreamble {
            version: version.to_string(),
            payload_len: len32,
        };
        let combined = preamble.encoded_len() as u64 + payload_len;
        let total = combined.div_ceil(SEGMENT_SIZE as u64);
        let total = u16::try_from(total).map_err(|_| TransferError::TooLarge(payload_len))?;
        Ok(Self { preamble, total })
    }

    pub fn total_segments(&self) -> u16 {
        self.total
    }

    pub fn payload_len(&self) -> u64 {
        u64::from(self.preamble.payload_len)
    }

    pub fn preamble(&self) -> &UpdatePreamble {
        &self.preamble
    }

    /// Payload bytes carried by segment `index` (1-based).
    pub fn payload_in_segment(&self, index: u16) -> usize {
        if index == 0 || index > self.total {
            return 0;
        }
        // Offsets within the combined preamble+payload stream.
        let combined = self.preamble.encoded_len() as u64 + self.payload_len();
        let start = (u64::from(index) - 1) * SEGMENT_SIZE as u64;
        let end = (start + SEGMENT_SIZE as u64).min(combined);
        let payload_start = start.max(self.preamble.encoded_len() as u64);
        end.saturating_sub(payload_start) as usize
    }
}

/// Optional pacing and hardening knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPolicy {
    /// Sleep after segment 1 instead of waiting for its ack.
    pub first_segment_delay: Option<Duration>,
    /// Give up when an ack takes longer than this.
    pub ack_timeout: Option<Duration>,
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub id: Uuid,
    pub address: String,
    pub segments_sent: u16,
    pub payload_bytes: u64,
}

/// Returned by [`FirmwareTransfers::start`]; the transfer runs regardless of
/// whether `done` is awaited.
#[derive(Debug)]
pub struct TransferTicket {
    pub id: Uuid,
    pub total_segments: u16,
    pub done: JoinHandle<Result<TransferReport, TransferError>>,
}

#[derive(Debug)]
struct ActiveTransfer {
    id: Uuid,
    acks: mpsc::Sender<TerminalAck>,
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Starts transfers and routes terminal acks to them.
#[derive(Debug)]
pub struct FirmwareTransfers {
    capacity: usize,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<String, ActiveTransfer>>>,
    policy: TransferPolicy,
}

impl FirmwareTransfers {
    /// `capacity` is the number of transfers allowed in flight at once; 0 is
    /// treated as 1.
    pub fn new(capacity: usize, policy: TransferPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// Opens `path` and pushes it to `session`.
    ///
    /// # Errors
    ///
    /// [`TransferError::Open`] when the file cannot be opened, otherwise as
    /// for [`start`](Self::start).
    pub async fn start_from_file(
        &self,
        session: SessionHandle,
        path: &Path,
        version: &str,
    ) -> Result<TransferTicket, TransferError> {
        let open_err = |source| TransferError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(open_err)?;
        let len = file.metadata().await.map_err(open_err)?.len();
        self.start(session, version, file, len).await
    }

    /// Spawns a transfer of `payload_len` bytes read from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Busy`] when every slot is taken,
    /// [`TransferError::AlreadyActive`] for a second transfer to the same
    /// connection, [`TransferError::PhoneUnknown`] before the terminal's first
    /// frame, and [`TransferError::TooLarge`] for oversized payloads.
    pub async fn start<R>(
        &self,
        session: SessionHandle,
        version: &str,
        source: R,
        payload_len: u64,
    ) -> Result<TransferTicket, TransferError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let plan = SegmentPlan::new(version, payload_len)?;
        let address = session.address().to_string();
        let phone = session
            .phone()
            .ok_or_else(|| TransferError::PhoneUnknown(address.clone()))?;
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| TransferError::Busy {
                capacity: self.capacity,
            })?;

        let id = Uuid::new_v4();
        let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE_DEPTH);
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&address) {
                return Err(TransferError::AlreadyActive(address));
            }
            active.insert(address.clone(), ActiveTransfer { id, acks: ack_tx });
        }

        info!(
            "transfer {id}: {} bytes to {address} ({phone}) in {} segment(s), version {}",
            plan.payload_len(),
            plan.total_segments(),
            plan.preamble().version
        );

        let total_segments = plan.total_segments();
        let active = Arc::clone(&self.active);
        let policy = self.policy.clone();
        let done = tokio::spawn(async move {
            let _permit = permit;
            let driver = TransferDriver {
                id,
                session,
                phone,
                plan,
                policy,
                acks: ack_rx,
            };
            let result = driver.run(source).await;

            let mut active = active.lock().await;
            if active.get(&address).map(|t| t.id) == Some(id) {
                active.remove(&address);
            }
            drop(active);

            match &result {
                Ok(report) => info!(
                    "transfer {id}: completed, {} segment(s) to {address}",
                    report.segments_sent
                ),
                Err(e) => warn!("transfer {id}: aborted: {e}"),
            }
            result
        });

        Ok(TransferTicket {
            id,
            total_segments,
            done,
        })
    }

    /// Forwards a terminal ack of `0x8108` to the transfer on `address`.
    ///
    /// Returns `false` when no transfer is waiting there.  Never blocks.
    pub async fn acknowledge(&self, address: &str, ack: TerminalAck) -> bool {
        let active = self.active.lock().await;
        match active.get(address) {
            Some(transfer) => transfer.acks.try_send(ack).is_ok(),
            None => false,
        }
    }

    /// Stops the transfer on `address`, if any.  The driver observes the
    /// closed ack channel and ends with [`TransferError::Cancelled`].
    pub async fn cancel(&self, address: &str) -> bool {
        self.active.lock().await.remove(address).is_some()
    }

    pub async fn is_active(&self, address: &str) -> bool {
        self.active.lock().await.contains_key(address)
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

struct TransferDriver {
    id: Uuid,
    session: SessionHandle,
    phone: PhoneNumber,
    plan: SegmentPlan,
    policy: TransferPolicy,
    acks: mpsc::Receiver<TerminalAck>,
}

impl TransferDriver {
    async fn run<R>(mut self, mut source: R) -> Result<TransferReport, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let total = self.plan.total_segments();

        for index in 1..=total {
            let body = self.fill_segment(&mut source, index).await?;
            let sequence = self.session.next_sequence();
            let mut header = Header::platform(ids::FIRMWARE_UPDATE, self.phone, sequence);
            header.packet = Some(PacketInfo { total, index });

            self.session
                .send(&Message { header, body })
                .await
                .map_err(|_| TransferError::SessionClosed { segment: index })?;
            debug!("transfer {}: sent segment {index}/{total}", self.id);

            match self.policy.first_segment_delay {
                Some(delay) if index == 1 => tokio::time::sleep(delay).await,
                _ => self.wait_for_ack(index, sequence).await?,
            }
        }

        Ok(TransferReport {
            id: self.id,
            address: self.session.address().to_string(),
            segments_sent: total,
            payload_bytes: self.plan.payload_len(),
        })
    }

    async fn fill_segment<R>(&self, source: &mut R, index: u16) -> Result<Vec<u8>, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut body = Vec::with_capacity(SEGMENT_SIZE);
        if index == 1 {
            body.extend_from_slice(&self.plan.preamble().encode());
        }
        let start = body.len();
        body.resize(start + self.plan.payload_in_segment(index), 0);

        source
            .read_exact(&mut body[start..])
            .await
            .map_err(|source| match source.kind() {
                ErrorKind::UnexpectedEof => TransferError::SourceTruncated { segment: index },
                _ => TransferError::SourceRead {
                    segment: index,
                    source,
                },
            })?;
        Ok(body)
    }

    /// Waits for the ack whose reply sequence matches the segment just sent.
    /// Acks for earlier segments (late or retransmitted) are skipped.
    async fn wait_for_ack(&mut self, segment: u16, sequence: u16) -> Result<(), TransferError> {
        let deadline = self
            .policy
            .ack_timeout
            .map(|timeout| (tokio::time::Instant::now() + timeout, timeout));
        loop {
            let ack = match deadline {
                Some((at, timeout)) => tokio::time::timeout_at(at, self.acks.recv())
                    .await
                    .map_err(|_| TransferError::AckTimeout { segment, timeout })?,
                None => self.acks.recv().await,
            };
            let ack = ack.ok_or(TransferError::Cancelled { segment })?;
            if ack.reply_sequence != sequence {
                debug!(
                    "transfer {}: skipping ack of sequence {} while segment {segment} waits for {sequence}",
                    self.id, ack.reply_sequence
                );
                continue;
            }
            if ack.result != 0 {
                warn!(
                    "transfer {}: terminal reported result {} for segment {segment}",
                    self.id, ack.result
                );
            }
            return Ok(());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::SessionChannels;
    use crate::application::session::SessionSnapshot;
    use jt808_core::protocol::decode_message;

    fn ack_for(segment: &Message) -> TerminalAck {
        TerminalAck {
            reply_sequence: segment.header.sequence,
            reply_id: ids::FIRMWARE_UPDATE,
            result: 0,
        }
    }

    fn bound_session(address: &str) -> (SessionHandle, SessionChannels) {
        let (handle, channels) = SessionHandle::new(address, 16);
        channels.snapshot_tx.send_replace(SessionSnapshot {
            phone: Some(PhoneNumber::from_digits("017255111111").unwrap()),
            ..SessionSnapshot::connected(address)
        });
        (handle, channels)
    }

    async fn next_segment(channels: &mut SessionChannels) -> Message {
        let frame = channels.outbound_rx.recv().await.expect("segment frame");
        decode_message(&frame).unwrap().0
    }

    #[test]
    fn test_plan_for_2000_bytes() {
        // Arrange / Act
        let plan = SegmentPlan::new(DEFAULT_FIRMWARE_VERSION, 2000).unwrap();

        // Assert: 17-byte preamble + 2000 = 2017 -> 2 segments
        assert_eq!(plan.preamble().encoded_len(), 17);
        assert_eq!(plan.total_segments(), 2);
        assert_eq!(plan.payload_in_segment(1), 1023 - 17);
        assert_eq!(plan.payload_in_segment(2), 2000 - (1023 - 17));
        assert_eq!(plan.payload_in_segment(3), 0);
    }

    #[test]
    fn test_plan_exact_multiple_has_no_empty_tail() {
        let plan = SegmentPlan::new(DEFAULT_FIRMWARE_VERSION, 2046 - 17).unwrap();
        assert_eq!(plan.total_segments(), 2);
        assert_eq!(plan.payload_in_segment(2), 1023);
    }

    #[test]
    fn test_plan_empty_payload_is_preamble_only() {
        let plan = SegmentPlan::new("v2", 0).unwrap();
        assert_eq!(plan.total_segments(), 1);
        assert_eq!(plan.payload_in_segment(1), 0);
    }

    #[test]
    fn test_plan_rejects_oversized_payload() {
        let err = SegmentPlan::new("v1", u64::from(u32::MAX) + 1).unwrap_err();
        assert!(matches!(err, TransferError::TooLarge(_)));
        let err = SegmentPlan::new("v1", 1023 * 70_000).unwrap_err();
        assert!(matches!(err, TransferError::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_segments_are_gated_on_acks() {
        // Arrange
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (session, mut channels) = bound_session("10.1.1.1:1");
        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        // Act
        let ticket = transfers
            .start(session, DEFAULT_FIRMWARE_VERSION, std::io::Cursor::new(payload.clone()), 3000)
            .await
            .unwrap();
        assert_eq!(ticket.total_segments, 3);

        let first = next_segment(&mut channels).await;
        let nothing = tokio::time::timeout(Duration::from_millis(50), channels.outbound_rx.recv()).await;
        assert!(nothing.is_err(), "segment 2 must wait for an ack");

        assert!(transfers.acknowledge("10.1.1.1:1", ack_for(&first)).await);
        let second = next_segment(&mut channels).await;
        assert!(transfers.acknowledge("10.1.1.1:1", ack_for(&second)).await);
        let third = next_segment(&mut channels).await;
        assert!(transfers.acknowledge("10.1.1.1:1", ack_for(&third)).await);

        let report = ticket.done.await.unwrap().unwrap();

        // Assert
        assert_eq!(report.segments_sent, 3);
        for (i, seg) in [&first, &second, &third].iter().enumerate() {
            assert_eq!(seg.header.message_id, ids::FIRMWARE_UPDATE);
            assert_eq!(
                seg.header.packet,
                Some(PacketInfo {
                    total: 3,
                    index: i as u16 + 1
                })
            );
        }
        let mut reassembled = first.body[17..].to_vec();
        reassembled.extend_from_slice(&second.body);
        reassembled.extend_from_slice(&third.body);
        assert_eq!(reassembled, payload);
        assert!(!transfers.is_active("10.1.1.1:1").await);
    }

    #[tokio::test]
    async fn test_repeated_ack_does_not_release_a_later_segment() {
        // Arrange
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (session, mut channels) = bound_session("10.1.1.12:1");
        let ticket = transfers
            .start(session, DEFAULT_FIRMWARE_VERSION, std::io::Cursor::new(vec![7u8; 3000]), 3000)
            .await
            .unwrap();
        let first = next_segment(&mut channels).await;
        assert!(transfers.acknowledge("10.1.1.12:1", ack_for(&first)).await);
        let second = next_segment(&mut channels).await;

        // Act: the terminal repeats its ack of segment 1
        assert!(transfers.acknowledge("10.1.1.12:1", ack_for(&first)).await);
        let early = tokio::time::timeout(Duration::from_millis(50), channels.outbound_rx.recv()).await;

        // Assert
        assert!(early.is_err(), "segment 3 must wait for the ack of segment 2");
        assert!(transfers.acknowledge("10.1.1.12:1", ack_for(&second)).await);
        let third = next_segment(&mut channels).await;
        assert_eq!(third.header.packet.map(|p| p.index), Some(3));
        assert!(transfers.acknowledge("10.1.1.12:1", ack_for(&third)).await);
        assert_eq!(ticket.done.await.unwrap().unwrap().segments_sent, 3);
    }

    #[tokio::test]
    async fn test_late_first_ack_under_delay_policy_is_skipped() {
        let policy = TransferPolicy {
            first_segment_delay: Some(Duration::from_millis(10)),
            ack_timeout: None,
        };
        let transfers = FirmwareTransfers::new(1, policy);
        let (session, mut channels) = bound_session("10.1.1.13:1");
        let ticket = transfers
            .start(session, DEFAULT_FIRMWARE_VERSION, std::io::Cursor::new(vec![1u8; 3000]), 3000)
            .await
            .unwrap();
        let first = next_segment(&mut channels).await;
        let second = next_segment(&mut channels).await;

        assert!(transfers.acknowledge("10.1.1.13:1", ack_for(&first)).await);
        let early = tokio::time::timeout(Duration::from_millis(50), channels.outbound_rx.recv()).await;

        assert!(early.is_err());
        assert!(transfers.acknowledge("10.1.1.13:1", ack_for(&second)).await);
        let third = next_segment(&mut channels).await;
        assert!(transfers.acknowledge("10.1.1.13:1", ack_for(&third)).await);
        assert!(ticket.done.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_segments_use_outbound_sequence_counter() {
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (session, mut channels) = bound_session("10.1.1.2:1");
        session.next_sequence();

        transfers
            .start(session, "v9", std::io::Cursor::new(vec![0u8; 10]), 10)
            .await
            .unwrap();

        let seg = next_segment(&mut channels).await;
        assert_eq!(seg.header.sequence, 1);
    }

    #[tokio::test]
    async fn test_first_segment_delay_skips_first_ack() {
        // Arrange
        let policy = TransferPolicy {
            first_segment_delay: Some(Duration::from_millis(10)),
            ack_timeout: None,
        };
        let transfers = FirmwareTransfers::new(1, policy);
        let (session, mut channels) = bound_session("10.1.1.3:1");

        // Act
        let ticket = transfers
            .start(session, DEFAULT_FIRMWARE_VERSION, std::io::Cursor::new(vec![1u8; 2000]), 2000)
            .await
            .unwrap();

        // Assert: segment 2 arrives with no ack for segment 1
        next_segment(&mut channels).await;
        let second = next_segment(&mut channels).await;
        assert_eq!(second.header.packet.map(|p| p.index), Some(2));
        assert!(transfers.acknowledge("10.1.1.3:1", ack_for(&second)).await);
        assert!(ticket.done.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_capacity_gate_rejects_second_transfer() {
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (a, _ca) = bound_session("10.1.1.4:1");
        let (b, _cb) = bound_session("10.1.1.5:1");

        let _first = transfers.start(a, "v1", std::io::Cursor::new(vec![0u8; 5]), 5).await.unwrap();
        let second = transfers.start(b, "v1", std::io::Cursor::new(vec![0u8; 5]), 5).await;

        assert!(matches!(second, Err(TransferError::Busy { capacity: 1 })));
    }

    #[tokio::test]
    async fn test_same_connection_cannot_run_two_transfers() {
        let transfers = FirmwareTransfers::new(2, TransferPolicy::default());
        let (a, _ca) = bound_session("10.1.1.6:1");

        let _first = transfers.start(a.clone(), "v1", std::io::Cursor::new(vec![0u8; 5]), 5).await.unwrap();
        let second = transfers.start(a, "v1", std::io::Cursor::new(vec![0u8; 5]), 5).await;

        assert!(matches!(second, Err(TransferError::AlreadyActive(_))));
    }

    #[tokio::test]
    async fn test_unbound_session_is_rejected() {
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (session, _channels) = SessionHandle::new("10.1.1.7:1", 4);

        let result = transfers.start(session, "v1", std::io::Cursor::new(vec![0u8; 5]), 5).await;

        assert!(matches!(result, Err(TransferError::PhoneUnknown(_))));
    }

    #[tokio::test]
    async fn test_cancel_releases_waiting_driver() {
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (session, mut channels) = bound_session("10.1.1.8:1");
        let ticket = transfers
            .start(session, "v1", std::io::Cursor::new(vec![0u8; 5]), 5)
            .await
            .unwrap();
        next_segment(&mut channels).await;

        assert!(transfers.cancel("10.1.1.8:1").await);

        let result = ticket.done.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled { segment: 1 })));
    }

    #[tokio::test]
    async fn test_ack_timeout_aborts_transfer() {
        let policy = TransferPolicy {
            first_segment_delay: None,
            ack_timeout: Some(Duration::from_millis(20)),
        };
        let transfers = FirmwareTransfers::new(1, policy);
        let (session, _channels) = bound_session("10.1.1.9:1");

        let ticket = transfers
            .start(session, "v1", std::io::Cursor::new(vec![0u8; 5]), 5)
            .await
            .unwrap();

        let result = ticket.done.await.unwrap();
        assert!(matches!(result, Err(TransferError::AckTimeout { segment: 1, .. })));
        assert!(!transfers.is_active("10.1.1.9:1").await);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_without_further_segments() {
        // Arrange: source fails after the first segment's worth of payload
        let first_chunk = vec![0xAA; 1023 - 17];
        let source = tokio_test::io::Builder::new()
            .read(&first_chunk)
            .read_error(std::io::Error::other("device removed"))
            .build();
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (session, mut channels) = bound_session("10.1.1.10:1");

        // Act
        let ticket = transfers
            .start(session, DEFAULT_FIRMWARE_VERSION, source, 3000)
            .await
            .unwrap();
        let first = next_segment(&mut channels).await;
        assert!(transfers.acknowledge("10.1.1.10:1", ack_for(&first)).await);

        // Assert
        let result = ticket.done.await.unwrap();
        assert!(matches!(result, Err(TransferError::SourceRead { segment: 2, .. })));
        assert!(channels.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_truncated_source_is_reported() {
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let (session, _channels) = bound_session("10.1.1.11:1");

        let ticket = transfers
            .start(session, "v1", std::io::Cursor::new(vec![0u8; 3]), 5)
            .await
            .unwrap();

        let result = ticket.done.await.unwrap();
        assert!(matches!(result, Err(TransferError::SourceTruncated { segment: 1 })));
    }

    #[tokio::test]
    async fn test_acknowledge_without_transfer_returns_false() {
        let transfers = FirmwareTransfers::new(1, TransferPolicy::default());
        let stray = TerminalAck {
            reply_sequence: 1,
            reply_id: ids::FIRMWARE_UPDATE,
            result: 0,
        };
        assert!(!transfers.acknowledge("10.9.9.9:1", stray).await);
    }
}
