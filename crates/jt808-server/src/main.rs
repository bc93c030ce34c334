//! JT/T808 terminal gateway entry point.
//!
//! # Usage
//!
//! ```text
//! jt808-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   TOML configuration file [default: jt808.toml]
//!   --port <PORT>     Override server.port
//!   --bind <ADDR>     Override server.bind_address
//!   --no-console      Do not read operator commands from stdin
//! ```
//!
//! | Variable       | Overrides       |
//! |----------------|-----------------|
//! | `JT808_CONFIG` | `--config`      |
//! | `JT808_PORT`   | `--port`        |
//! | `JT808_BIND`   | `--bind`        |
//! | `RUST_LOG`     | `logging.level` |

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use jt808_server::application::admin::AdminService;
use jt808_server::application::firmware::FirmwareTransfers;
use jt808_server::application::registry::SessionRegistry;
use jt808_server::infrastructure::console::run_console;
use jt808_server::infrastructure::network::{run_server, ConnectionContext};
use jt808_server::infrastructure::storage::{
    load_config, AppConfig, FrameLog, StaticDeviceDirectory, TelemetryLog,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// JT/T808 vehicle terminal gateway.
#[derive(Debug, Parser)]
#[command(
    name = "jt808-server",
    about = "JT/T808 terminal gateway with firmware push and operator console",
    version
)]
struct Cli {
    /// Configuration file.  A missing file means built-in defaults.
    #[arg(long, default_value = "jt808.toml", env = "JT808_CONFIG")]
    config: PathBuf,

    /// TCP port for terminal connections.
    #[arg(long, env = "JT808_PORT")]
    port: Option<u16>,

    /// Address to bind the terminal listener to.
    #[arg(long, env = "JT808_BIND")]
    bind: Option<String>,

    /// Run without the stdin operator console.
    #[arg(long)]
    no_console: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        config
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file_config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let config = cli.apply_overrides(file_config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("JT808 gateway starting (config {})", cli.config.display());

    // ── Collaborators ─────────────────────────────────────────────────────────
    let directory = StaticDeviceDirectory::from_entries(&config.devices)
        .context("invalid [[devices]] entry")?;
    info!("{} provisioned device(s)", directory.len());

    let telemetry = TelemetryLog::open(config.storage.telemetry_path.as_deref())
        .await
        .context("opening telemetry journal")?;
    let audit = FrameLog::open(config.storage.audit_path.as_deref())
        .await
        .context("opening frame audit journal")?;

    let registry = Arc::new(SessionRegistry::new());
    let transfers = Arc::new(FirmwareTransfers::new(
        config.firmware.max_concurrent_transfers,
        config.firmware.transfer_policy(),
    ));
    let admin = Arc::new(AdminService::new(
        Arc::clone(&registry),
        Arc::clone(&transfers),
        config.firmware.version.clone(),
    ));
    let ctx = Arc::new(ConnectionContext {
        registry,
        transfers,
        directory: Arc::new(directory),
        telemetry: Arc::new(telemetry),
        audit: Arc::new(audit),
        limits: config.server.limits(),
    });

    // ── Operator console ──────────────────────────────────────────────────────
    if !cli.no_console {
        tokio::spawn(async move {
            let input = BufReader::new(tokio::io::stdin());
            if let Err(e) = run_console(admin, input, tokio::io::stdout()).await {
                error!("console stopped: {e}");
            }
        });
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    run_server(&addr, ctx, running).await?;

    info!("JT808 gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
