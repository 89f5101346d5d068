//! CLI for the server supervisor daemon.
//!
//! The binary lives in `main.rs`; the parser and the small non-daemon
//! helpers live here so they can be unit-tested.

pub mod eula;
pub mod parser;

pub use eula::accept_eula;
pub use parser::{Cli, Commands};
