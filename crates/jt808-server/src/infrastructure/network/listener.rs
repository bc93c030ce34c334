//! TCP accept loop.
//!
//! Accepts terminal connections and hands each one to its own Tokio task
//! running [`serve_connection`].  The loop polls a shared `running` flag
//! between accepts so Ctrl-C stops it within one accept timeout.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::connection::{serve_connection, ConnectionContext};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Binds the terminal listener.
///
/// # Errors
///
/// Returns an error if the address is unusable or already in use.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind terminal listener on {addr}"))
}

/// Binds `addr` and serves connections until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    addr: &str,
    ctx: Arc<ConnectionContext>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = bind(addr).await?;
    serve(listener, ctx, running).await
}

/// Accept loop over an already bound listener.
///
/// # Errors
///
/// Currently infallible once bound; accept errors are logged and skipped.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    if let Ok(local) = listener.local_addr() {
        info!("listening for terminals on {local}");
    }

    while running.load(Ordering::Relaxed) {
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(handle_connection(stream, peer, ctx));
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    info!("shutdown flag set; stopping accept loop");
    Ok(())
}

/// Runs one connection and logs how it ended.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("session {peer}: could not disable Nagle: {e}");
    }
    match serve_connection(stream, peer.to_string(), ctx).await {
        Ok(()) => info!("session {peer} closed normally"),
        Err(e) => warn!("session {peer} closed with error: {e:#}"),
    }
}
