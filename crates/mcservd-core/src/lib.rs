//! Core domain types and port definitions for mcservd.
//!
//! This crate holds everything the transport and runtime crates share:
//! the error taxonomy, the typed model of console output, and the
//! `CommandChannel` port that both transports implement.

pub mod console;
pub mod error;
pub mod ports;

pub use console::{CommandReply, ConsoleCommand, ConsoleResult, PlayerEvent, ResultKind};
pub use error::{ChannelError, FrameError};
pub use ports::{CommandChannel, NoopPlayerEventSink, PlayerEventSink};
