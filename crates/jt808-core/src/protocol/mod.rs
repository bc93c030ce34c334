//! Protocol module: frame codec, message codec, message types, and the
//! outbound sequence counter.

pub mod codec;
pub mod frame;
pub mod messages;
pub mod sequence;

pub use codec::{
    decode_content, decode_message, encode_content, encode_message, filter, DecodedFrame,
    FilterError, FilterOutcome, ProtocolError, Rejected, MAX_FRAMES_PER_FILTER,
};
pub use frame::{checksum, decode_frame, encode_frame, FrameError, RawFrame};
pub use messages::*;
pub use sequence::SequenceCounter;
