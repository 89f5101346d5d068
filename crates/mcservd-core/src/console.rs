//! Typed model of the server console.
//!
//! The log classifier turns raw console lines into these types; the
//! console-backed command channel and the supervisor's per-command outcome
//! tables consume them. The RCON transport never produces `ConsoleResult`s
//! (its replies arrive correlated on the wire), so `CommandReply.result`
//! is optional.

use serde::{Deserialize, Serialize};

/// Semantic outcome classes of console command results.
///
/// One variant per distinguishable server message. The supervisor's command
/// table lists, per command, which of these it may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    PlayerOpped,
    PlayerDeopped,
    PlayerWhitelisted,
    PlayerUnwhitelisted,
    PlayerBanned,
    PlayerUnbanned,
    StartupDone,
    SaveOff,
    SaveAll,
    SaveAllDone,
    SaveOn,
    NothingChangedOp,
    NothingChangedDeop,
    NothingChangedBan,
    NothingChangedUnban,
    AlreadyWhitelisted,
    AlreadyNotWhitelisted,
    PlayerNotFound,
}

/// One classified command result: which outcome matched, plus the groups
/// captured by its pattern (player name, ban reason, elapsed seconds, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleResult {
    pub kind: ResultKind,
    pub captures: Vec<String>,
}

impl ConsoleResult {
    #[must_use]
    pub fn new(kind: ResultKind, captures: Vec<String>) -> Self {
        Self { kind, captures }
    }

    /// First capture group, if any. For the player-targeting commands this
    /// is the player name the server echoed back.
    #[must_use]
    pub fn first_capture(&self) -> Option<&str> {
        self.captures.first().map(String::as_str)
    }
}

/// Player activity observed on the console, independent of any command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A player connected and spawned.
    Joined {
        player: String,
        address: String,
        entity_id: String,
    },
    /// The server reported a dropped connection with a reason.
    LostConnection { player: String, reason: String },
    /// The player left the game normally.
    LeftGame { player: String },
}

/// One command to issue to the server, plus the result classes it can
/// produce on the console.
///
/// The `expected` set is the per-command contract the log-backed transport
/// needs for correlation; the protocol-backed transport ignores it (replies
/// arrive on the same connection). An empty set means the command produces
/// no result line worth waiting for.
#[derive(Debug, Clone)]
pub struct ConsoleCommand {
    pub argv: Vec<String>,
    pub expected: &'static [ResultKind],
}

impl ConsoleCommand {
    pub fn new<I, S>(argv: I, expected: &'static [ResultKind]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            expected,
        }
    }

    /// Fire-and-forget command with no expected console result.
    pub fn fire_and_forget<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(argv, &[])
    }

    /// The single line sent to the server: argv joined by spaces.
    #[must_use]
    pub fn line(&self) -> String {
        self.argv.join(" ")
    }
}

/// What came back from one command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// Raw response text (RCON payload, or a reconstruction of the matched
    /// console line for the log-backed transport).
    pub text: String,
    /// Classified result, present only on the log-backed transport.
    pub result: Option<ConsoleResult>,
}

impl CommandReply {
    #[must_use]
    pub fn from_text(text: String) -> Self {
        Self { text, result: None }
    }

    #[must_use]
    pub fn from_result(text: String, result: ConsoleResult) -> Self {
        Self {
            text,
            result: Some(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_argv_with_single_spaces() {
        let cmd = ConsoleCommand::fire_and_forget(["say", "hello", "world"]);
        assert_eq!(cmd.line(), "say hello world");
    }

    #[test]
    fn first_capture_is_none_when_empty() {
        let result = ConsoleResult::new(ResultKind::SaveOn, vec![]);
        assert_eq!(result.first_capture(), None);
    }
}
