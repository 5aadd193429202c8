//! Core library: the single-writer event loop and per-connection fiber
//! pair described in the design notes, plus the protocol dispatcher that
//! runs inside it. `main.rs` is a thin process entry point around
//! [`server::run`].

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod names;
pub mod numeric;
pub mod server;
