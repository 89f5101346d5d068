//! RCON wire protocol: frame codec and client.
//!
//! The game server's remote console speaks a small length-prefixed binary
//! protocol with an authenticate/command handshake. This crate owns the
//! frame layout and a client that holds exactly one connection; callers
//! (the supervisor's command lock) guarantee a single in-flight exchange.

mod client;
mod frame;

pub use client::RconClient;
pub use frame::{Frame, KIND_AUTH, KIND_AUTH_FAILED, KIND_COMMAND};
