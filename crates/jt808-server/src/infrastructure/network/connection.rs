//! Per-connection loop: socket bytes in, dispatched replies out.
//!
//! Each accepted connection runs two tasks:
//!
//! ```text
//! socket read half ──► buffer ──► filter ──► TerminalSession ──► SessionHandle::send
//!                                                 │                      │
//!                                      SegmentAck ▼                      ▼ mpsc
//!                                      FirmwareTransfers        writer task ──► socket write half
//! ```
//!
//! The read loop owns the [`TerminalSession`], so session state has a single
//! writer.  Firmware segments and control requests reach the socket through
//! the same outbound queue as replies, so the writer task is the only place
//! that touches the write half.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use jt808_core::protocol::{filter, DecodedFrame, FilterError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::firmware::FirmwareTransfers;
use crate::application::ports::{DeviceDirectory, Direction, FrameAudit, TelemetrySink};
use crate::application::registry::{SessionHandle, SessionRegistry};
use crate::application::session::{Dispatch, SessionSnapshot, TerminalSession};

/// How long teardown waits for queued frames to be flushed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection buffer and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
    /// Buffered bytes above which pending data is discarded.
    pub max_pending_bytes: usize,
    /// Close the connection after this long without inbound bytes.
    pub read_timeout: Option<Duration>,
    /// Depth of the outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            max_pending_bytes: 64 * 1024,
            read_timeout: None,
            outbound_queue: 64,
        }
    }
}

/// Everything a connection needs from the rest of the process.
pub struct ConnectionContext {
    pub registry: Arc<SessionRegistry>,
    pub transfers: Arc<FirmwareTransfers>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub audit: Arc<dyn FrameAudit>,
    pub limits: ConnectionLimits,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serves one terminal connection until the peer closes it, a socket error
/// occurs, or the idle timeout fires.
///
/// The session is registered under `address` for the lifetime of the call and
/// removed on every exit path, along with any firmware transfer it was
/// receiving.
///
/// # Errors
///
/// Returns an error for socket read failures and when the writer task has
/// stopped while a reply was pending.
pub async fn serve_connection<S>(
    stream: S,
    address: String,
    ctx: Arc<ConnectionContext>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (handle, channels) = SessionHandle::new(address.clone(), ctx.limits.outbound_queue);
    ctx.registry.insert(handle.clone()).await;
    info!("session {address}: connected");

    let (mut reader, writer) = tokio::io::split(stream);
    let writer_task = tokio::spawn(write_loop(
        writer,
        channels.outbound_rx,
        Arc::clone(&ctx.audit),
        address.clone(),
    ));

    let mut session = TerminalSession::new(
        address.clone(),
        Arc::clone(&ctx.directory),
        Arc::clone(&ctx.telemetry),
    );
    let result = read_loop(&mut reader, &mut session, &handle, &ctx, |snapshot| {
        channels.snapshot_tx.send_replace(snapshot);
    })
    .await;

    // ── Teardown ──────────────────────────────────────────────────────────────
    ctx.registry.remove(&address).await;
    if ctx.transfers.cancel(&address).await {
        info!("session {address}: cancelled in-flight firmware transfer");
    }
    drop(handle);

    let mut writer_task = writer_task;
    match timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => debug!("session {address}: writer stopped: {e}"),
        Ok(Err(e)) => warn!("session {address}: writer task failed: {e}"),
        Err(_) => {
            debug!("session {address}: writer still busy at teardown; aborting");
            writer_task.abort();
        }
    }

    info!("session {address}: disconnected");
    result
}

// ── Read side ─────────────────────────────────────────────────────────────────

async fn read_loop<R, F>(
    reader: &mut R,
    session: &mut TerminalSession,
    handle: &SessionHandle,
    ctx: &ConnectionContext,
    publish: F,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    F: Fn(SessionSnapshot),
{
    let address = handle.address().to_string();
    let mut buf: Vec<u8> = Vec::with_capacity(ctx.limits.read_buffer_size * 2);
    let mut chunk = vec![0u8; ctx.limits.read_buffer_size.max(1)];

    loop {
        let read = match ctx.limits.read_timeout {
            Some(limit) => match timeout(limit, reader.read(&mut chunk)).await {
                Ok(read) => read,
                Err(_) => {
                    info!("session {address}: idle for {limit:?}; closing");
                    return Ok(());
                }
            },
            None => reader.read(&mut chunk).await,
        };
        let n = read.with_context(|| format!("session {address}: socket read failed"))?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        process_buffer(&mut buf, session, handle, ctx).await?;
        publish(session.snapshot());

        if buf.len() > ctx.limits.max_pending_bytes {
            warn!(
                "session {address}: {} bytes pending without a complete frame; dropping",
                buf.len()
            );
            audit_inbound(ctx, &buf).await;
            buf.clear();
        }
    }
}

/// Runs `filter` over `buf` until nothing more can be extracted, dispatching
/// every decoded frame in arrival order.
async fn process_buffer(
    buf: &mut Vec<u8>,
    session: &mut TerminalSession,
    handle: &SessionHandle,
    ctx: &ConnectionContext,
) -> anyhow::Result<()> {
    loop {
        match filter(buf.as_slice()) {
            Ok(outcome) => {
                for frame in &outcome.frames {
                    audit_inbound(ctx, &buf[frame.span.clone()]).await;
                }
                if let Some(rejected) = &outcome.rejected {
                    audit_inbound(ctx, &buf[rejected.span.clone()]).await;
                    warn!(
                        "session {}: dropped {} bytes: {}",
                        handle.address(),
                        rejected.span.len(),
                        rejected.error
                    );
                }
                dispatch_all(outcome.frames, session, handle, ctx).await?;
                buf.drain(..outcome.consumed);

                let resume = outcome.rejected.is_some() && outcome.consumed > 0 && !buf.is_empty();
                if !resume {
                    return Ok(());
                }
            }
            Err(FilterError::TooManyFrames {
                limit,
                frames,
                consumed,
            }) => {
                for frame in &frames {
                    audit_inbound(ctx, &buf[frame.span.clone()]).await;
                }
                audit_inbound(ctx, &buf[consumed..]).await;
                warn!(
                    "session {}: more than {limit} frames buffered; dropping {} pending bytes",
                    handle.address(),
                    buf.len() - consumed
                );
                buf.clear();
                return dispatch_all(frames, session, handle, ctx).await;
            }
        }
    }
}

async fn dispatch_all(
    frames: Vec<DecodedFrame>,
    session: &mut TerminalSession,
    handle: &SessionHandle,
    ctx: &ConnectionContext,
) -> anyhow::Result<()> {
    for frame in frames {
        match session.handle_message(&frame.message).await {
            Ok(Dispatch::Reply(reply)) => handle
                .send(&reply)
                .await
                .with_context(|| format!("session {}: reply not delivered", handle.address()))?,
            Ok(Dispatch::SegmentAck(ack)) => {
                if !ctx.transfers.acknowledge(handle.address(), ack).await {
                    debug!(
                        "session {}: segment ack with no transfer waiting",
                        handle.address()
                    );
                }
            }
            Ok(Dispatch::Silent) => {}
            Err(e) => warn!(
                "session {}: message 0x{:04X} dropped: {e}",
                handle.address(),
                frame.message.message_id()
            ),
        }
    }
    Ok(())
}

async fn audit_inbound(ctx: &ConnectionContext, raw: &[u8]) {
    ctx.audit
        .log_frame(Direction::Inbound, SystemTime::now(), &hex::encode_upper(raw))
        .await;
}

// ── Write side ────────────────────────────────────────────────────────────────

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    audit: Arc<dyn FrameAudit>,
    address: String,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    while let Some(frame) = outbound.recv().await {
        audit
            .log_frame(Direction::Outbound, SystemTime::now(), &hex::encode_upper(&frame))
            .await;
        if let Err(e) = writer.write_all(&frame).await {
            warn!("session {address}: socket write failed: {e}");
            return Err(e);
        }
    }
    writer.shutdown().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
