//! The two command-channel transports.
//!
//! [`RconChannel`] speaks the binary protocol over TCP; [`ConsoleChannel`]
//! writes to the child's stdin and correlates classified stdout results.
//! Both satisfy the same [`CommandChannel`] port and are selected when the
//! supervisor is constructed, not by duplicating supervisor logic.

use std::io::ErrorKind;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tracing::debug;

use mcservd_core::{ChannelError, CommandChannel, CommandReply, ConsoleCommand, ResultKind};
use mcservd_rcon::RconClient;

use crate::classifier::ResultQueue;

/// Protocol-backed channel: delegates to the RCON client and decodes
/// response payloads as UTF-8 text.
pub struct RconChannel {
    client: RconClient,
}

impl RconChannel {
    #[must_use]
    pub fn new(client: RconClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandChannel for RconChannel {
    async fn authenticate(&mut self, secret: &str) -> Result<bool, ChannelError> {
        self.client.authenticate(secret).await
    }

    async fn run(&mut self, cmd: &ConsoleCommand) -> Result<CommandReply, ChannelError> {
        let payload = self.client.run_command(&cmd.argv).await?;
        let text = String::from_utf8_lossy(&payload).into_owned();
        Ok(CommandReply::from_text(text))
    }

    async fn close(&mut self) {
        self.client.close().await;
    }
}

/// Log-backed channel: stdin write plus classified-result wait.
///
/// The transport has no credential step, so `authenticate` always succeeds.
/// Correlation depends on the caller-supplied expected-result set of each
/// command and on single-flight command issuance.
pub struct ConsoleChannel {
    stdin: Option<ChildStdin>,
    results: ResultQueue,
}

impl ConsoleChannel {
    #[must_use]
    pub fn new(stdin: ChildStdin, results: ResultQueue) -> Self {
        Self {
            stdin: Some(stdin),
            results,
        }
    }

    /// Wait for the server to report startup completion; returns the
    /// elapsed seconds the server printed.
    pub async fn wait_startup(&mut self) -> Result<f64, ChannelError> {
        let result = self.results.wait_for(&[ResultKind::StartupDone]).await?;
        result
            .first_capture()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ChannelError::Protocol("startup message without elapsed time".into()))
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        let stdin = self.stdin.as_mut().ok_or(ChannelError::NotConnected)?;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write.await.map_err(|e| {
            // A torn pipe means the process is gone, not a network fault.
            if e.kind() == ErrorKind::BrokenPipe {
                ChannelError::ChildExited
            } else {
                ChannelError::Transport(e)
            }
        })
    }
}

#[async_trait]
impl CommandChannel for ConsoleChannel {
    async fn authenticate(&mut self, _secret: &str) -> Result<bool, ChannelError> {
        Ok(true)
    }

    async fn run(&mut self, cmd: &ConsoleCommand) -> Result<CommandReply, ChannelError> {
        // Results queued before the command is written cannot be its
        // outcome; drop them so idle chatter never correlates.
        let stale = self.results.drain_pending();
        if stale > 0 {
            debug!(stale, "discarded console results queued before the command");
        }
        self.write_line(&cmd.line()).await?;
        if cmd.expected.is_empty() {
            return Ok(CommandReply::from_text(String::new()));
        }
        let result = self.results.wait_for(cmd.expected).await?;
        debug!(kind = ?result.kind, "console command result");
        Ok(CommandReply::from_result(result.captures.join(" "), result))
    }

    async fn close(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
    }
}
