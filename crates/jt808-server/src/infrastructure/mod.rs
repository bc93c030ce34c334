//! Infrastructure layer of the gateway.
//!
//! Contains the OS-facing adapters: TCP sockets, the TOML config file,
//! JSON-lines journals, and the stdin operator console.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `jt808_core`, but MUST NOT be imported by the `application` layer.

pub mod console;
pub mod network;
pub mod storage;
