//! Message codec: header/body layout on top of the frame codec, and the
//! multi-frame [`filter`] used by connection read loops.
//!
//! Content layout inside one frame (big-endian, before stuffing):
//! ```text
//! [message_id:2][attribute:2][version:1][phone:10][sequence:2]([total:2][index:2])?[body:N]
//! ```

use std::ops::Range;

use thiserror::Error;
use tracing::debug;

use crate::protocol::frame::{decode_frame, encode_frame, FrameError};
use crate::protocol::messages::{
    Attribute, Header, Message, PacketInfo, PhoneNumber, BASE_HEADER_LEN, MAX_BODY_LEN,
    PACKET_INFO_LEN, PHONE_LEN,
};

/// Hard cap on frames extracted by a single [`filter`] call.
pub const MAX_FRAMES_PER_FILTER: usize = 10;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Framing, escaping, or checksum failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The content is shorter than the header it must carry.
    #[error("header too short: need {needed} bytes, got {available}")]
    HeaderTooShort { needed: usize, available: usize },

    /// The attribute body length disagrees with the bytes after the header.
    #[error("body length mismatch: header says {declared}, available is {available}")]
    BodyLengthMismatch { declared: usize, available: usize },

    /// A body longer than the 10-bit length field can describe.
    #[error("body too long: {0} bytes (max 1023)")]
    BodyTooLong(usize),

    /// The APDU could not be parsed for its message id.
    #[error("malformed APDU: {0}")]
    MalformedApdu(String),

    /// A phone-number string that is not up to 20 BCD digits.
    #[error("invalid phone number: {0:?}")]
    InvalidPhone(String),
}

/// A [`filter`] call hit [`MAX_FRAMES_PER_FILTER`] with bytes still pending.
///
/// The caller should process `frames` and drop its buffered data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("too many frames in one buffer (limit {limit})")]
    TooManyFrames {
        limit: usize,
        frames: Vec<DecodedFrame>,
        consumed: usize,
    },
}

/// A message decoded by [`filter`], with the raw bytes it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub message: Message,
    /// Sentinel-to-sentinel range within the filtered buffer.
    pub span: Range<usize>,
}

/// A frame (or run of garbage) that [`filter`] skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub error: ProtocolError,
    /// Bytes discarded for this rejection.
    pub span: Range<usize>,
}

/// Result of one [`filter`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Successfully decoded messages, in arrival order.
    pub frames: Vec<DecodedFrame>,
    /// Bytes the caller must drop from the front of its buffer.
    pub consumed: usize,
    /// The error that stopped the scan, if any.
    pub rejected: Option<Rejected>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into a complete, stuffed physical frame.
///
/// The attribute word is derived from the header and the body: the length is
/// the body length and the multi-packet bit follows `header.packet`.
///
/// # Errors
///
/// Returns [`ProtocolError::BodyTooLong`] for bodies over 1023 bytes.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    encode_content(msg).map(|content| encode_frame(&content))
}

/// Serialises header and body without framing.
///
/// # Errors
///
/// Returns [`ProtocolError::BodyTooLong`] for bodies over 1023 bytes.
pub fn encode_content(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body_len = msg.body.len();
    if body_len > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLong(body_len));
    }

    let header = &msg.header;
    let mut buf = Vec::with_capacity(BASE_HEADER_LEN + PACKET_INFO_LEN + body_len);
    buf.extend_from_slice(&header.message_id.to_be_bytes());
    buf.extend_from_slice(&header.attribute(body_len).bits().to_be_bytes());
    buf.push(header.protocol_version);
    buf.extend_from_slice(header.phone.as_bytes());
    buf.extend_from_slice(&header.sequence.to_be_bytes());
    if let Some(packet) = header.packet {
        buf.extend_from_slice(&packet.total.to_be_bytes());
        buf.extend_from_slice(&packet.index.to_be_bytes());
    }
    buf.extend_from_slice(&msg.body);
    Ok(buf)
}

/// Decodes the first frame in `bytes` into a [`Message`].
///
/// Returns the message and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError::Frame`] for framing failures (which carry their
/// own consumed count) and the structural variants for bad headers.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, usize), ProtocolError> {
    let raw = decode_frame(bytes)?;
    let msg = decode_content(&raw.content)?;
    Ok((msg, raw.consumed))
}

/// Parses unescaped frame content (checksum already stripped).
///
/// # Errors
///
/// Returns [`ProtocolError::HeaderTooShort`] when the header (including the
/// packet fields announced by the attribute) does not fit, and
/// [`ProtocolError::BodyLengthMismatch`] when the declared body length differs
/// from the bytes present.
pub fn decode_content(content: &[u8]) -> Result<Message, ProtocolError> {
    require_header(content, BASE_HEADER_LEN)?;

    let message_id = u16::from_be_bytes([content[0], content[1]]);
    let attribute = Attribute::from_bits(u16::from_be_bytes([content[2], content[3]]));
    let protocol_version = content[4];
    let mut phone = [0u8; PHONE_LEN];
    phone.copy_from_slice(&content[5..5 + PHONE_LEN]);
    let sequence = u16::from_be_bytes([content[15], content[16]]);

    let mut offset = BASE_HEADER_LEN;
    let packet = if attribute.multi_packet {
        require_header(content, BASE_HEADER_LEN + PACKET_INFO_LEN)?;
        let info = PacketInfo {
            total: u16::from_be_bytes([content[offset], content[offset + 1]]),
            index: u16::from_be_bytes([content[offset + 2], content[offset + 3]]),
        };
        offset += PACKET_INFO_LEN;
        Some(info)
    } else {
        None
    };

    let declared = attribute.body_len as usize;
    let available = content.len() - offset;
    if declared != available {
        return Err(ProtocolError::BodyLengthMismatch {
            declared,
            available,
        });
    }

    Ok(Message {
        header: Header {
            message_id,
            encryption: attribute.encryption,
            versioned: attribute.versioned,
            protocol_version,
            phone: PhoneNumber::from_bytes(phone),
            sequence,
            packet,
        },
        body: content[offset..].to_vec(),
    })
}

/// Extracts up to [`MAX_FRAMES_PER_FILTER`] messages from an accumulating
/// buffer.
///
/// Stops at the first bad frame and reports it in
/// [`FilterOutcome::rejected`]; its bytes are included in `consumed`. A frame
/// whose end sentinel has not arrived yet is left in place (only the garbage
/// in front of it is consumed) and is not reported as rejected.
///
/// # Errors
///
/// Returns [`FilterError::TooManyFrames`] when the cap is reached while bytes
/// remain; the error carries the frames decoded so far.
pub fn filter(buf: &[u8]) -> Result<FilterOutcome, FilterError> {
    let mut outcome = FilterOutcome::default();

    while outcome.consumed < buf.len() {
        if outcome.frames.len() == MAX_FRAMES_PER_FILTER {
            return Err(FilterError::TooManyFrames {
                limit: MAX_FRAMES_PER_FILTER,
                frames: outcome.frames,
                consumed: outcome.consumed,
            });
        }

        let offset = outcome.consumed;
        match decode_frame(&buf[offset..]) {
            Ok(raw) => {
                let span = offset + raw.start..offset + raw.consumed;
                outcome.consumed += raw.consumed;
                match decode_content(&raw.content) {
                    Ok(message) => outcome.frames.push(DecodedFrame { message, span }),
                    Err(error) => {
                        debug!("dropping frame at {:?}: {error}", span);
                        outcome.rejected = Some(Rejected { error, span });
                        break;
                    }
                }
            }
            Err(err) if err.is_incomplete() => {
                outcome.consumed += err.consumed();
                break;
            }
            Err(err) => {
                let span = offset..offset + err.consumed();
                outcome.consumed += err.consumed();
                debug!("dropping bytes {:?}: {err}", span);
                outcome.rejected = Some(Rejected {
                    error: err.into(),
                    span,
                });
                break;
            }
        }
    }

    Ok(outcome)
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_header(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::HeaderTooShort {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
