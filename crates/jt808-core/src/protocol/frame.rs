//! Frame codec: sentinel delimiting, byte stuffing, and the XOR checksum.
//!
//! Wire format of one physical frame:
//! ```text
//! 0x7E [content ... ][checksum:1] 0x7E
//! ```
//! Inside the sentinels every `0x7D` is sent as `0x7D 0x01` and every `0x7E`
//! as `0x7D 0x02`.  The checksum is the XOR of all unescaped content bytes.
//!
//! This layer knows nothing about headers; it hands the unescaped content
//! (checksum stripped) to [`crate::protocol::codec`].

use thiserror::Error;

/// Frame start/end marker.
pub const SENTINEL: u8 = 0x7E;

/// Escape marker.
pub const ESCAPE: u8 = 0x7D;

/// Second byte of the stuffed form of [`ESCAPE`].
const ESCAPED_ESCAPE: u8 = 0x01;

/// Second byte of the stuffed form of [`SENTINEL`].
const ESCAPED_SENTINEL: u8 = 0x02;

/// Minimum number of raw bytes that must lie between the two sentinels.
pub const MIN_FRAME_INTERIOR: usize = 15;

/// Errors produced while carving a frame out of a byte buffer.
///
/// Every variant records `consumed`: the number of bytes at the front of the
/// buffer the caller must discard so that the stream stays synchronised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer holds no start sentinel at all; all of it is garbage.
    #[error("no start sentinel in {consumed} bytes")]
    NoStart { consumed: usize },

    /// A start sentinel was found but the end sentinel has not arrived yet.
    ///
    /// `consumed` covers only the garbage in front of the start sentinel.
    #[error("frame incomplete: no end sentinel yet")]
    Incomplete { consumed: usize },

    /// Fewer than [`MIN_FRAME_INTERIOR`] bytes between the sentinels.
    ///
    /// `consumed` stops short of the end sentinel, which may open the next
    /// frame.
    #[error("frame too short: {len} bytes between sentinels")]
    TooShort { len: usize, consumed: usize },

    /// `0x7D` followed by something other than `0x01` or `0x02`.
    #[error("invalid escape sequence 0x7D 0x{byte:02X}")]
    InvalidEscape { byte: u8, consumed: usize },

    /// Recomputed XOR does not match the transmitted checksum byte.
    #[error("checksum mismatch: computed 0x{computed:02X}, frame carries 0x{carried:02X}")]
    ChecksumMismatch {
        computed: u8,
        carried: u8,
        consumed: usize,
    },
}

impl FrameError {
    /// Number of bytes the caller must drop from the front of its buffer.
    pub fn consumed(&self) -> usize {
        match *self {
            FrameError::NoStart { consumed }
            | FrameError::Incomplete { consumed }
            | FrameError::TooShort { consumed, .. }
            | FrameError::InvalidEscape { consumed, .. }
            | FrameError::ChecksumMismatch { consumed, .. } => consumed,
        }
    }

    /// `true` when more bytes may complete the frame.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FrameError::Incomplete { .. })
    }
}

/// One frame carved out of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Unescaped content between the sentinels, checksum byte removed.
    pub content: Vec<u8>,
    /// Offset of the start sentinel within the scanned buffer.
    pub start: usize,
    /// Bytes consumed from the front of the buffer (end sentinel index + 1).
    pub consumed: usize,
}

/// XOR of every byte in `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Decodes the first frame found in `buf`.
///
/// Never blocks and never reads past `buf`.
///
/// # Errors
///
/// Returns a [`FrameError`]; use [`FrameError::consumed`] to resynchronise.
pub fn decode_frame(buf: &[u8]) -> Result<RawFrame, FrameError> {
    let mut start = buf
        .iter()
        .position(|&b| b == SENTINEL)
        .ok_or(FrameError::NoStart { consumed: buf.len() })?;
    // In a run of sentinels only the last one can open a frame.
    while buf.get(start + 1) == Some(&SENTINEL) {
        start += 1;
    }

    let end = buf[start + 1..]
        .iter()
        .position(|&b| b == SENTINEL)
        .map(|offset| start + 1 + offset)
        .ok_or(FrameError::Incomplete { consumed: start })?;

    let interior = &buf[start + 1..end];
    if interior.len() < MIN_FRAME_INTERIOR {
        return Err(FrameError::TooShort {
            len: interior.len(),
            consumed: end,
        });
    }

    let consumed = end + 1;

    let mut content = unescape(interior).map_err(|byte| FrameError::InvalidEscape { byte, consumed })?;

    // `unescape` can shrink the interior, but never below one byte here.
    let carried = content.pop().unwrap_or_default();
    let computed = checksum(&content);
    if computed != carried {
        return Err(FrameError::ChecksumMismatch {
            computed,
            carried,
            consumed,
        });
    }

    Ok(RawFrame {
        content,
        start,
        consumed,
    })
}

/// Wraps `content` into a complete physical frame.
///
/// Appends the checksum, stuffs `0x7D`/`0x7E`, and adds both sentinels.
pub fn encode_frame(content: &[u8]) -> Vec<u8> {
    let cs = checksum(content);
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(SENTINEL);
    for &b in content.iter().chain(std::iter::once(&cs)) {
        match b {
            ESCAPE => out.extend_from_slice(&[ESCAPE, ESCAPED_ESCAPE]),
            SENTINEL => out.extend_from_slice(&[ESCAPE, ESCAPED_SENTINEL]),
            _ => out.push(b),
        }
    }
    out.push(SENTINEL);
    out
}

/// Reverses byte stuffing.  On failure returns the offending byte after `0x7D`.
fn unescape(raw: &[u8]) -> Result<Vec<u8>, u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter().copied();
    while let Some(b) = bytes.next() {
        if b != ESCAPE {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(ESCAPED_ESCAPE) => out.push(ESCAPE),
            Some(ESCAPED_SENTINEL) => out.push(SENTINEL),
            // A trailing lone 0x7D is reported as escaping the end sentinel.
            Some(other) => return Err(other),
            None => return Err(SENTINEL),
        }
    }
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
