//! # jt808-core
//!
//! Wire protocol for JT/T808-style vehicle terminals: sentinel framing with
//! byte stuffing and an XOR checksum, the message header (including
//! multi-packet segments), and the APDU bodies the platform understands.
//!
//! This crate performs no I/O.  The server crate feeds it raw socket bytes
//! through [`protocol::filter`] and hands the resulting [`Message`]s to its
//! per-terminal sessions.
//!
//! - **`protocol::frame`** – finds frames in a byte buffer, undoes stuffing,
//!   verifies the checksum; and the reverse.
//! - **`protocol::codec`** – header/body layout, plus `filter`, which pulls up
//!   to ten frames out of an accumulating buffer per call.
//! - **`protocol::messages`** – message ids, `Header`, `Message`, the inbound
//!   `Apdu` enum, and outbound bodies (acks, control, firmware preamble).

pub mod protocol;

pub use protocol::codec::{decode_message, encode_message, filter, FilterError, ProtocolError};
pub use protocol::frame::FrameError;
pub use protocol::messages::{Apdu, Header, Message, PacketInfo, PhoneNumber};
