//! TCP accept loop and the per-connection read/write loops.

pub mod connection;
pub mod listener;

pub use connection::{serve_connection, ConnectionContext, ConnectionLimits};
pub use listener::{bind, run_server, serve};
