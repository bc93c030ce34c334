//! Application layer of the gateway.
//!
//! Everything here talks to the outside world through the traits in
//! [`ports`] or through channels; there are no sockets and no files.
//!
//! - **`session`**  – per-connection protocol state and the APDU dispatcher.
//! - **`registry`** – live connections keyed by peer address, plus the
//!   [`registry::SessionHandle`] other tasks use to reach one.
//! - **`firmware`** – segmented, ack-gated firmware pushes.
//! - **`admin`**    – operator entry points (listing, firmware, control).

pub mod admin;
pub mod firmware;
pub mod ports;
pub mod registry;
pub mod session;
