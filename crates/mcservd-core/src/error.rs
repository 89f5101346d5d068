//! Error taxonomy shared across the workspace.
//!
//! Transport errors are recoverable (they drive the reconnect loop),
//! protocol errors are fatal to the connection but not to the supervisor,
//! and a vanished child is reported to the caller, never swallowed.

use thiserror::Error;

/// Errors surfaced by a command channel (either transport).
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Connection refused/reset or any other socket-level failure.
    /// Recoverable: the supervisor retries connection establishment.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection is desynchronized (request-id mismatch, truncated or
    /// malformed reply). Fatal to this connection only.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The server rejected the RCON password.
    #[error("Authentication rejected by server")]
    AuthFailed,

    /// A command was issued but the child process is gone.
    #[error("Child process has exited")]
    ChildExited,

    /// No live channel exists (never connected or cleared by the waiter).
    #[error("No live connection to the server")]
    NotConnected,
}

/// Errors from encoding or decoding a single RCON frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes were supplied than the declared frame size.
    #[error("Truncated frame: declared {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Payload too large for the u32 size field.
    #[error("Payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),
}
