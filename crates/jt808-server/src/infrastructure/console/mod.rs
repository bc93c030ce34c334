//! Operator console: line-oriented commands read from stdin.
//!
//! ```text
//! ls                               list live sessions
//! update <phone> <file> [version]  push a firmware image
//! ctrl <phone> <command> [param]   send a terminal control request
//! help                             show this text
//! ```
//!
//! Bad input prints an error and the usage text; the loop only ends at EOF.

use std::path::PathBuf;
use std::sync::Arc;

use jt808_core::protocol::{PhoneNumber, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::application::admin::AdminService;
use crate::application::session::SessionSnapshot;

pub const USAGE: &str = "\
commands:
  ls                               list live sessions
  update <phone> <file> [version]  push a firmware image
  ctrl <phone> <command> [param]   send a control request (command 0-255)
  help                             show this text
";

#[derive(Debug, Error, PartialEq)]
pub enum ConsoleError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),
    #[error(transparent)]
    Phone(#[from] ProtocolError),
    #[error("control command must be 0-255, got {0:?}")]
    InvalidControl(String),
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Update {
        phone: PhoneNumber,
        path: PathBuf,
        version: Option<String>,
    },
    Control {
        phone: PhoneNumber,
        command: u8,
        param: String,
    },
    Help,
    Empty,
}

/// Parses one input line.
///
/// # Errors
///
/// Returns a [`ConsoleError`] describing the first problem found.
pub fn parse(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ConsoleCommand::Empty);
    };

    match verb {
        "ls" | "list" => Ok(ConsoleCommand::List),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "update" => {
            let phone = phone_arg(words.next())?;
            let path = words.next().ok_or(ConsoleError::MissingArgument("file"))?;
            Ok(ConsoleCommand::Update {
                phone,
                path: PathBuf::from(path),
                version: words.next().map(str::to_string),
            })
        }
        "ctrl" => {
            let phone = phone_arg(words.next())?;
            let raw = words.next().ok_or(ConsoleError::MissingArgument("command"))?;
            let command = raw
                .parse::<u8>()
                .map_err(|_| ConsoleError::InvalidControl(raw.to_string()))?;
            Ok(ConsoleCommand::Control {
                phone,
                command,
                param: words.collect::<Vec<_>>().join(" "),
            })
        }
        other => Err(ConsoleError::UnknownCommand(other.to_string())),
    }
}

fn phone_arg(word: Option<&str>) -> Result<PhoneNumber, ConsoleError> {
    let digits = word.ok_or(ConsoleError::MissingArgument("phone"))?;
    Ok(PhoneNumber::from_digits(digits)?)
}

/// Reads commands from `input` until EOF, writing results to `output`.
///
/// # Errors
///
/// Returns I/O errors from `input` or `output`.  Command failures are
/// reported on `output` and never end the loop.
pub async fn run_console<R, W>(
    admin: Arc<AdminService>,
    input: R,
    mut output: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let reply = match parse(&line) {
            Ok(command) => execute(&admin, command).await,
            Err(e) => format!("error: {e}\n{USAGE}"),
        };
        output.write_all(reply.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

async fn execute(admin: &AdminService, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Empty => String::new(),
        ConsoleCommand::Help => USAGE.to_string(),
        ConsoleCommand::List => render_sessions(&admin.list_sessions().await),
        ConsoleCommand::Update {
            phone,
            path,
            version,
        } => match admin
            .start_firmware_update(&phone, &path, version.as_deref())
            .await
        {
            Ok(ticket) => {
                let id = ticket.id;
                let total = ticket.total_segments;
                tokio::spawn(async move {
                    match ticket.done.await {
                        Ok(Ok(report)) => info!(
                            "firmware update {id} to {} done: {} segments, {} bytes",
                            report.address, report.segments_sent, report.payload_bytes
                        ),
                        Ok(Err(e)) => warn!("firmware update {id} failed: {e}"),
                        Err(e) => warn!("firmware update {id} task ended abnormally: {e}"),
                    }
                });
                format!("update {id} started for {phone}: {total} segments\n")
            }
            Err(e) => format!("error: {e}\n"),
        },
        ConsoleCommand::Control {
            phone,
            command,
            param,
        } => match admin.send_control(&phone, command, &param).await {
            Ok(sequence) => format!("control {command} sent to {phone} (seq {sequence})\n"),
            Err(e) => format!("error: {e}\n"),
        },
    }
}

fn render_sessions(sessions: &[SessionSnapshot]) -> String {
    let mut out = format!("{} session(s)\n", sessions.len());
    for s in sessions {
        out.push_str(&format!(
            "{}\tphone={}\timei={}\ticcid={}\n",
            s.address,
            s.phone_digits(),
            or_dash(&s.imei),
            or_dash(&s.iccid)
        ));
    }
    out
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
