//! Port definitions.
//!
//! These traits are the seams between the supervisor and its collaborators.
//! Implementations live in `mcservd-runtime`; tests substitute mocks.

use async_trait::async_trait;

use crate::console::{CommandReply, ConsoleCommand, PlayerEvent};
use crate::error::ChannelError;

/// Abstract capability to authenticate and run a text command against the
/// game server, regardless of transport.
///
/// Two implementations exist: one speaking the binary RCON protocol over
/// TCP, one writing to the child's stdin and correlating classified console
/// output. They are selected at supervisor construction time.
///
/// # Contract
///
/// At most one exchange may be in flight per channel. `run` takes
/// `&mut self` and the supervisor keeps the only live channel behind its
/// command lock, so a second concurrent exchange cannot be expressed.
#[async_trait]
pub trait CommandChannel: Send {
    /// Present credentials to the server.
    ///
    /// Returns `Ok(false)` on a clean rejection, `Err(ChannelError::
    /// Protocol)` on a desynchronized reply. Transports without a
    /// credential step return `Ok(true)`.
    async fn authenticate(&mut self, secret: &str) -> Result<bool, ChannelError>;

    /// Issue one command and wait for its outcome.
    async fn run(&mut self, cmd: &ConsoleCommand) -> Result<CommandReply, ChannelError>;

    /// Release the transport. Idempotent.
    async fn close(&mut self);
}

/// Consumer of player activity observed on the console.
///
/// The classifier delivers join/disconnect/leave events here instead of
/// discarding them, so future consumers (session tracking, alerting) plug
/// in without touching the classifier.
pub trait PlayerEventSink: Send + Sync {
    fn deliver(&self, event: PlayerEvent);
}

/// Default sink: drops events after a debug log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlayerEventSink;

impl PlayerEventSink for NoopPlayerEventSink {
    fn deliver(&self, event: PlayerEvent) {
        tracing::debug!(?event, "player event (no sink registered)");
    }
}
