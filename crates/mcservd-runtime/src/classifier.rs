//! Console log classifier (the log-backed transport's read side).
//!
//! The child's stdout is read line by line and matched against a
//! timestamp/thread/level envelope; lines that don't look like log records
//! are dropped. The record text is then matched against two pattern
//! families: player actions go to the pluggable [`PlayerEventSink`], and
//! command results become typed [`ConsoleResult`]s on a single-consumer
//! queue that [`ResultQueue::wait_for`] drains.
//!
//! Correlation relies on commands being issued one at a time (the
//! supervisor's command lock); results the consumer didn't ask for are
//! logged and discarded rather than requeued.
//!
//! The queue is bounded and the reader never blocks on it: chatter that
//! matches a result pattern while no command is waiting (periodic saves,
//! another operator's console) is dropped once the queue fills, and the
//! console channel drains leftovers before issuing each command.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mcservd_core::{ChannelError, ConsoleResult, PlayerEvent, PlayerEventSink, ResultKind};

/// Results queued between commands before the oldest get dropped.
const RESULT_QUEUE_CAPACITY: usize = 64;

/// `[HH:MM:SS] [thread/LEVEL]: text`
static LOG_ENVELOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s+\[([^/]+)/(\w+)\]:\s+(.*)").unwrap()
});

/// One pattern per semantic command outcome.
static RESULT_PATTERNS: LazyLock<Vec<(ResultKind, Regex)>> = LazyLock::new(|| {
    use ResultKind::*;
    [
        (PlayerOpped, r"^Made (\S+) a server operator"),
        (PlayerDeopped, r"^Made (\S+) no longer a server operator"),
        (PlayerWhitelisted, r"^Added (\S+) to the whitelist"),
        (PlayerUnwhitelisted, r"^Removed (\S+) from the whitelist"),
        (PlayerBanned, r"^Banned (\S+): (.*)"),
        (PlayerUnbanned, r"^Unbanned (\S+)"),
        (StartupDone, r"^Done \((\d+\.\d+)s\)! For help, type"),
        (SaveOff, r"^Automatic saving is now disabled"),
        (SaveAll, r"^Saving the game \(this may take a moment!\)"),
        (SaveAllDone, r"^Saved the game"),
        (SaveOn, r"^Automatic saving is now enabled"),
        (NothingChangedOp, r"^Nothing changed\. The player already is an operator"),
        (NothingChangedDeop, r"^Nothing changed\. The player is not an operator"),
        (NothingChangedBan, r"^Nothing changed\. The player is already banned"),
        (NothingChangedUnban, r"^Nothing changed\. The player isn't banned"),
        (AlreadyWhitelisted, r"^Player is already whitelisted"),
        (AlreadyNotWhitelisted, r"^Player is not whitelisted"),
        (PlayerNotFound, r"^That player does not exist"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).unwrap()))
    .collect()
});

static PLAYER_JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^\[]+)\[/?([0-9.]+:\d{1,5})\] logged in with entity id (\d+)").unwrap()
});
static PLAYER_DISCONNECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+) lost connection: (.*)").unwrap());
static PLAYER_LEFT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+) has left the game").unwrap());

/// Strip the log envelope, returning the record text.
fn envelope_text(line: &str) -> Option<&str> {
    LOG_ENVELOPE
        .captures(line)
        .and_then(|caps| caps.get(4))
        .map(|m| m.as_str())
}

/// Classify record text against the command-result patterns.
///
/// Also used directly by the supervisor to classify raw RCON response text,
/// which arrives without the log envelope.
#[must_use]
pub fn classify_result(text: &str) -> Option<ConsoleResult> {
    for (kind, pattern) in RESULT_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let captures = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect();
            return Some(ConsoleResult::new(*kind, captures));
        }
    }
    None
}

/// Classify record text against the player-action patterns.
#[must_use]
pub fn classify_player(text: &str) -> Option<PlayerEvent> {
    if let Some(caps) = PLAYER_JOIN.captures(text) {
        return Some(PlayerEvent::Joined {
            player: caps[1].trim().to_string(),
            address: caps[2].to_string(),
            entity_id: caps[3].to_string(),
        });
    }
    if let Some(caps) = PLAYER_DISCONNECT.captures(text) {
        return Some(PlayerEvent::LostConnection {
            player: caps[1].to_string(),
            reason: caps[2].to_string(),
        });
    }
    if let Some(caps) = PLAYER_LEFT.captures(text) {
        return Some(PlayerEvent::LeftGame {
            player: caps[1].to_string(),
        });
    }
    None
}

/// Single-consumer queue of classified command results.
pub struct ResultQueue {
    rx: mpsc::Receiver<ConsoleResult>,
}

impl ResultQueue {
    /// Discard every result already queued, returning how many there were.
    ///
    /// Called before a command is issued: anything queued at that point is
    /// chatter from before the command and must not correlate with it.
    pub fn drain_pending(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(result) = self.rx.try_recv() {
            debug!(kind = ?result.kind, "draining stale command result");
            discarded += 1;
        }
        discarded
    }

    /// Block until a result whose kind is in `expected` arrives.
    ///
    /// Results of other kinds are server chatter between issuing a command
    /// and seeing its outcome; they are logged and discarded, never
    /// requeued. A closed queue means the reader hit EOF: the child exited.
    pub async fn wait_for(&mut self, expected: &[ResultKind]) -> Result<ConsoleResult, ChannelError> {
        loop {
            let Some(result) = self.rx.recv().await else {
                return Err(ChannelError::ChildExited);
            };
            if expected.contains(&result.kind) {
                return Ok(result);
            }
            warn!(kind = ?result.kind, ?expected, "discarding unexpected command result");
        }
    }
}

/// Spawn the reader task over the child's stdout.
///
/// Lines are read as bytes and decoded lossily: the server can emit invalid
/// UTF-8 and the reader must not die on it. The task ends at EOF, which
/// closes the result queue. Enqueueing never blocks the reader: a full
/// queue drops the new result instead.
pub fn spawn_console_classifier(
    stdout: impl AsyncRead + Unpin + Send + 'static,
    sink: Arc<dyn PlayerEventSink>,
) -> ResultQueue {
    let (tx, rx) = mpsc::channel(RESULT_QUEUE_CAPACITY);

    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    let line = String::from_utf8_lossy(&buf);
                    let Some(text) = envelope_text(&line) else {
                        continue;
                    };

                    if let Some(result) = classify_result(text) {
                        debug!(kind = ?result.kind, "classified command result");
                        match tx.try_send(result) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(result)) => {
                                debug!(kind = ?result.kind, "result queue full; dropping");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break, // consumer gone
                        }
                    } else if let Some(event) = classify_player(text) {
                        sink.deliver(event);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "console reader exiting on read error");
                    break;
                }
            }
        }
        debug!("console classifier task exiting");
    });

    ResultQueue { rx }
}
