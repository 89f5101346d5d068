//! Process supervisor: the state machine that owns the game-server child.
//!
//! One supervisor owns at most one child process and at most one command
//! channel to it. All channel traffic is serialized through the command
//! lock (the mutex around the channel slot); backups additionally hold the
//! backup lock, always acquired *before* the command lock. A dedicated
//! exit-waiter task owns the `Child` handle and is the single source of
//! truth for "the process is gone": it clears the pid, the credentials and
//! the channel, and flips the liveness watch.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use mcservd_core::{
    ChannelError, CommandChannel, CommandReply, ConsoleCommand, NoopPlayerEventSink,
    PlayerEventSink, ResultKind,
};
use mcservd_rcon::RconClient;

use crate::backup::{ArchiveReport, run_archiver};
use crate::channel::{ConsoleChannel, RconChannel};
use crate::classifier::{classify_result, spawn_console_classifier};
use crate::properties::force_enable_rcon;
use crate::shutdown::terminate_pid;

/// Default delay between connection attempts while the child is alive.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

const RCON_HOST: &str = "127.0.0.1";

/// How the supervisor talks to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Binary remote-console protocol over TCP (credentials forced into the
    /// server's configuration store before spawn).
    Rcon,
    /// Child stdin writes correlated against classified stdout output.
    Console,
}

/// Filesystem layout of the managed server.
#[derive(Debug, Clone)]
pub struct ServerPaths {
    pub server_jar: PathBuf,
    pub world_path: PathBuf,
    pub java_exe: String,
    pub backup_path: PathBuf,
}

impl ServerPaths {
    pub fn new(server_jar: impl Into<PathBuf>, world_path: impl Into<PathBuf>) -> Self {
        let world_path = world_path.into();
        let backup_path = world_path.join("backups");
        Self {
            server_jar: server_jar.into(),
            world_path,
            java_exe: "java".to_string(),
            backup_path,
        }
    }

    #[must_use]
    pub fn with_java(mut self, java_exe: impl Into<String>) -> Self {
        self.java_exe = java_exe.into();
        self
    }

    #[must_use]
    pub fn with_backup_path(mut self, backup_path: impl Into<PathBuf>) -> Self {
        self.backup_path = backup_path.into();
        self
    }
}

/// Errors surfaced by supervisor operations that are not expressible as a
/// structured outcome.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Server process is not running. You can start it again with \"start\".")]
    NotRunning,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Failed to spawn server process: {0}")]
    Spawn(io::Error),

    #[error("Archiver failed to run: {0}")]
    Archiver(io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result of `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub ok: bool,
    pub detail: String,
}

/// Result of `query`: pid snapshot, taken without touching the command lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOutcome {
    pub running: bool,
    pub pid: Option<u32>,
}

/// Result of the player-targeting commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerOutcome {
    pub ok: bool,
    pub player: String,
}

/// Result of `do_backup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Archived {
        path: PathBuf,
    },
    /// The backup lock was held; nothing was done and the call did not block.
    AlreadyInProgress,
    Failed {
        detail: String,
        stdout: String,
        stderr: String,
    },
}

/// Result of `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub ok: bool,
    pub detail: Option<String>,
}

#[derive(Clone)]
struct RconCredentials {
    port: u16,
    password: String,
}

#[derive(Default)]
struct RunState {
    pid: Option<u32>,
    rcon: Option<RconCredentials>,
    alive: Option<watch::Receiver<bool>>,
}

/// State shared with the exit-waiter task.
struct Shared {
    /// The command lock. The only live channel sits inside it, so holding
    /// the guard *is* the exclusive right to talk to the child.
    channel: Mutex<Option<Box<dyn CommandChannel>>>,
    state: StdMutex<RunState>,
}

/// Supervisor for one game-server child process.
pub struct Supervisor {
    paths: ServerPaths,
    transport: Transport,
    reconnect_delay: Duration,
    player_sink: Arc<dyn PlayerEventSink>,
    shared: Arc<Shared>,
    /// Serializes backups against each other; acquired strictly before the
    /// command lock, never the other way around.
    backup_lock: Mutex<()>,
}

impl Supervisor {
    #[must_use]
    pub fn new(paths: ServerPaths, transport: Transport) -> Self {
        Self {
            paths,
            transport,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            player_sink: Arc::new(NoopPlayerEventSink),
            shared: Arc::new(Shared {
                channel: Mutex::new(None),
                state: StdMutex::new(RunState::default()),
            }),
            backup_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_player_sink(mut self, sink: Arc<dyn PlayerEventSink>) -> Self {
        self.player_sink = sink;
        self
    }

    fn pid(&self) -> Option<u32> {
        self.shared.state.lock().unwrap().pid
    }

    fn alive_watch(&self) -> Option<watch::Receiver<bool>> {
        self.shared.state.lock().unwrap().alive.clone()
    }

    /// Start the child and establish the command channel.
    ///
    /// A failure to connect or authenticate is reported in the outcome but
    /// leaves the child running; only an early child exit aborts the
    /// connection loop.
    pub async fn start(&self) -> Result<StartOutcome, SupervisorError> {
        let mut slot = self.shared.channel.lock().await;

        if let Some(pid) = self.pid() {
            return Ok(StartOutcome {
                ok: false,
                detail: format!("Process already started. (pid={pid})"),
            });
        }

        let creds = match self.transport {
            Transport::Rcon => {
                let (port, password) = force_enable_rcon(&self.paths.world_path)
                    .map_err(|e| SupervisorError::Config(e.to_string()))?;
                Some(RconCredentials { port, password })
            }
            Transport::Console => None,
        };

        std::fs::create_dir_all(&self.paths.backup_path)
            .map_err(|e| SupervisorError::Config(format!("backup directory: {e}")))?;

        let mut child = self.spawn_child()?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Spawn(io::Error::other("spawned child has no pid")))?;
        info!(pid, jar = %self.paths.server_jar.display(), "server process spawned");

        // The console transport takes its pipes before the waiter takes the child.
        let console_parts = if self.transport == Transport::Console {
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| SupervisorError::Spawn(io::Error::other("child stdin not piped")))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| SupervisorError::Spawn(io::Error::other("child stdout not piped")))?;
            let results = spawn_console_classifier(stdout, Arc::clone(&self.player_sink));
            Some((stdin, results))
        } else {
            None
        };

        let (alive_tx, alive_rx) = watch::channel(true);
        {
            let mut state = self.shared.state.lock().unwrap();
            state.pid = Some(pid);
            state.rcon = creds.clone();
            state.alive = Some(alive_rx.clone());
        }
        self.spawn_exit_waiter(child, alive_tx);

        match console_parts {
            None => {
                let creds = creds.ok_or_else(|| {
                    SupervisorError::Config("rcon transport without credentials".into())
                })?;
                let mut alive = alive_rx;
                match self.connect_with_retry(&creds, &mut alive).await {
                    Ok(channel) => {
                        *slot = Some(channel);
                        Ok(StartOutcome {
                            ok: true,
                            detail: format!(
                                "Process started and RCON connection established. (pid={pid})"
                            ),
                        })
                    }
                    Err(SupervisorError::Channel(ChannelError::ChildExited)) => Ok(StartOutcome {
                        ok: false,
                        detail: "Process started but didn't stay up.".to_string(),
                    }),
                    Err(e) => {
                        warn!(error = %e, "rcon connection could not be established");
                        Ok(StartOutcome {
                            ok: false,
                            detail: format!(
                                "Process started but couldn't establish RCON connection. (pid={pid})"
                            ),
                        })
                    }
                }
            }
            Some((stdin, results)) => {
                let mut channel = ConsoleChannel::new(stdin, results);
                match channel.wait_startup().await {
                    Ok(elapsed) => {
                        *slot = Some(Box::new(channel));
                        Ok(StartOutcome {
                            ok: true,
                            detail: format!("Process started in {elapsed}s. (pid={pid})"),
                        })
                    }
                    Err(e) => {
                        warn!(error = %e, "server never reported startup completion");
                        Ok(StartOutcome {
                            ok: false,
                            detail: "Process started but didn't stay up.".to_string(),
                        })
                    }
                }
            }
        }
    }

    fn spawn_child(&self) -> Result<Child, SupervisorError> {
        let mut cmd = Command::new(&self.paths.java_exe);
        cmd.arg("-jar")
            .arg(&self.paths.server_jar)
            .current_dir(&self.paths.world_path);
        match self.transport {
            Transport::Rcon => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
            Transport::Console => {
                cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
            }
        }
        cmd.spawn().map_err(SupervisorError::Spawn)
    }

    /// Launch the exit waiter: it owns the `Child`, reaps it, and clears
    /// every piece of per-run state when it goes.
    fn spawn_exit_waiter(&self, mut child: Child, alive_tx: watch::Sender<bool>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let status = child.wait().await;
            info!(status = ?status.as_ref().ok(), "server process exited");
            {
                let mut state = shared.state.lock().unwrap();
                state.pid = None;
                state.rcon = None;
                state.alive = None;
            }
            // Signal liveness before touching the channel slot: `stop`
            // holds the command lock while awaiting this watch.
            let _ = alive_tx.send(false);
            let mut slot = shared.channel.lock().await;
            if let Some(mut channel) = slot.take() {
                channel.close().await;
            }
        });
    }

    /// Connect and authenticate, retrying transport failures with a fixed
    /// delay for as long as the child is alive. Abandoned the moment the
    /// exit waiter reports termination.
    async fn connect_with_retry(
        &self,
        creds: &RconCredentials,
        alive: &mut watch::Receiver<bool>,
    ) -> Result<Box<dyn CommandChannel>, SupervisorError> {
        loop {
            if !*alive.borrow() {
                return Err(ChannelError::ChildExited.into());
            }
            match RconClient::connect(RCON_HOST, creds.port).await {
                Ok(client) => {
                    let mut channel = RconChannel::new(client);
                    return match channel.authenticate(&creds.password).await {
                        Ok(true) => Ok(Box::new(channel)),
                        Ok(false) => {
                            channel.close().await;
                            Err(ChannelError::AuthFailed.into())
                        }
                        Err(e) => {
                            channel.close().await;
                            Err(e.into())
                        }
                    };
                }
                Err(ChannelError::Transport(e)) => {
                    debug!(error = %e, delay = ?self.reconnect_delay, "connection attempt failed; retrying");
                    tokio::select! {
                        () = tokio::time::sleep(self.reconnect_delay) => {}
                        _ = alive.changed() => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// One reconnect+reauthenticate cycle for the mid-command repair path.
    async fn reconnect_once(&self) -> Result<Box<dyn CommandChannel>, SupervisorError> {
        if self.transport == Transport::Console {
            // The console transport has nothing to reconnect to.
            return Err(ChannelError::NotConnected.into());
        }
        let creds = self
            .shared
            .state
            .lock()
            .unwrap()
            .rcon
            .clone()
            .ok_or(SupervisorError::NotRunning)?;

        let client = RconClient::connect(RCON_HOST, creds.port).await?;
        let mut channel = RconChannel::new(client);
        if channel.authenticate(&creds.password).await? {
            Ok(Box::new(channel))
        } else {
            channel.close().await;
            Err(ChannelError::AuthFailed.into())
        }
    }

    /// Run one command on the locked channel slot, transparently attempting
    /// a single reconnect+reauthenticate cycle on channel failure.
    async fn run_on_channel(
        &self,
        slot: &mut Option<Box<dyn CommandChannel>>,
        cmd: &ConsoleCommand,
    ) -> Result<CommandReply, SupervisorError> {
        if self.pid().is_none() {
            return Err(SupervisorError::NotRunning);
        }
        let channel = match slot.as_mut() {
            Some(channel) => channel,
            None => slot.insert(self.reconnect_once().await?),
        };

        match channel.run(cmd).await {
            Ok(reply) => Ok(reply),
            Err(e) if self.transport == Transport::Rcon => {
                warn!(error = %e, command = %cmd.line(), "channel failed; reconnecting once");
                let mut fresh = match self.reconnect_once().await {
                    Ok(fresh) => fresh,
                    Err(reconnect_err) => {
                        *slot = None;
                        return Err(reconnect_err);
                    }
                };
                let reply = fresh.run(cmd).await;
                *slot = Some(fresh);
                Ok(reply?)
            }
            Err(e) => {
                *slot = None;
                Err(e.into())
            }
        }
    }

    /// Pid snapshot. Never blocks behind the command lock.
    #[must_use]
    pub fn query(&self) -> QueryOutcome {
        let pid = self.pid();
        QueryOutcome {
            running: pid.is_some(),
            pid,
        }
    }

    /// Broadcast a chat message.
    pub async fn say(&self, message: &str) -> Result<(), SupervisorError> {
        let mut slot = self.shared.channel.lock().await;
        self.run_on_channel(&mut slot, &say_command(message)).await?;
        Ok(())
    }

    pub async fn ban(
        &self,
        player: &str,
        reason: Option<&str>,
    ) -> Result<PlayerOutcome, SupervisorError> {
        let mut argv = vec!["ban".to_string(), player.to_string()];
        if let Some(reason) = reason {
            argv.push(reason.to_string());
        }
        self.player_command(
            ConsoleCommand::new(argv, BAN_RESULTS),
            ResultKind::PlayerBanned,
            player,
        )
        .await
    }

    pub async fn unban(&self, player: &str) -> Result<PlayerOutcome, SupervisorError> {
        self.player_command(
            ConsoleCommand::new(["pardon", player], UNBAN_RESULTS),
            ResultKind::PlayerUnbanned,
            player,
        )
        .await
    }

    pub async fn whitelist(&self, player: &str) -> Result<PlayerOutcome, SupervisorError> {
        self.player_command(
            ConsoleCommand::new(["whitelist", "add", player], WHITELIST_RESULTS),
            ResultKind::PlayerWhitelisted,
            player,
        )
        .await
    }

    pub async fn unwhitelist(&self, player: &str) -> Result<PlayerOutcome, SupervisorError> {
        self.player_command(
            ConsoleCommand::new(["whitelist", "remove", player], UNWHITELIST_RESULTS),
            ResultKind::PlayerUnwhitelisted,
            player,
        )
        .await
    }

    pub async fn op(&self, player: &str) -> Result<PlayerOutcome, SupervisorError> {
        self.player_command(
            ConsoleCommand::new(["op", player], OP_RESULTS),
            ResultKind::PlayerOpped,
            player,
        )
        .await
    }

    pub async fn deop(&self, player: &str) -> Result<PlayerOutcome, SupervisorError> {
        self.player_command(
            ConsoleCommand::new(["deop", player], DEOP_RESULTS),
            ResultKind::PlayerDeopped,
            player,
        )
        .await
    }

    /// Issue one player-targeting command and classify its response.
    ///
    /// Success requires the response to match the command's success outcome
    /// *and* to name the targeted player.
    async fn player_command(
        &self,
        cmd: ConsoleCommand,
        success: ResultKind,
        player: &str,
    ) -> Result<PlayerOutcome, SupervisorError> {
        let mut slot = self.shared.channel.lock().await;
        let reply = self.run_on_channel(&mut slot, &cmd).await?;
        drop(slot);

        let result = reply.result.or_else(|| classify_result(&reply.text));
        let ok = result.is_some_and(|r| r.kind == success && r.first_capture() == Some(player));
        Ok(PlayerOutcome {
            ok,
            player: player.to_string(),
        })
    }

    /// Quiesce the server, archive the world, and re-enable auto-save.
    ///
    /// The `save-on` restore step runs unconditionally after the archive
    /// attempt, before either lock is released; its failure is surfaced
    /// only after it has been attempted.
    pub async fn do_backup(&self) -> Result<BackupOutcome, SupervisorError> {
        // Lock order: backup lock strictly before the command lock.
        let Ok(_backup_guard) = self.backup_lock.try_lock() else {
            return Ok(BackupOutcome::AlreadyInProgress);
        };
        let mut slot = self.shared.channel.lock().await;

        self.run_on_channel(&mut slot, &say_command("Backing up the world..."))
            .await?;
        self.run_on_channel(&mut slot, &ConsoleCommand::new(["save-off"], SAVE_OFF_RESULTS))
            .await?;

        let archive = self.quiesced_archive(&mut slot).await;

        // Auto-save comes back on no matter how the archive went.
        let restore = self
            .run_on_channel(&mut slot, &ConsoleCommand::new(["save-on"], SAVE_ON_RESULTS))
            .await;

        let outcome = match archive {
            Ok(report) if report.success => {
                let _ = self
                    .run_on_channel(&mut slot, &say_command("... backup done!"))
                    .await;
                Ok(BackupOutcome::Archived { path: report.path })
            }
            Ok(report) => {
                let _ = self
                    .run_on_channel(&mut slot, &say_command("... backup FAILED!"))
                    .await;
                Ok(BackupOutcome::Failed {
                    detail: format!(
                        "Failed to back up world to {}. (exit={:?})",
                        report.path.display(),
                        report.exit_code
                    ),
                    stdout: report.stdout,
                    stderr: report.stderr,
                })
            }
            Err(e) => Err(e),
        };

        restore?;
        outcome
    }

    /// save-all, then the archiver subprocess. On the console transport the
    /// intermediate "Saving the game" result is chatter the final wait
    /// tolerates and discards.
    async fn quiesced_archive(
        &self,
        slot: &mut Option<Box<dyn CommandChannel>>,
    ) -> Result<ArchiveReport, SupervisorError> {
        self.run_on_channel(slot, &ConsoleCommand::new(["save-all"], SAVE_ALL_RESULTS))
            .await?;
        run_archiver(&self.paths.world_path, &self.paths.backup_path)
            .await
            .map_err(SupervisorError::Archiver)
    }

    /// Issue the stop command and block until the exit waiter observes
    /// termination.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let mut slot = self.shared.channel.lock().await;
        if self.pid().is_none() {
            return Ok(StopOutcome {
                ok: false,
                detail: Some("The server process is already stopped.".to_string()),
            });
        }
        let alive = self.alive_watch();

        // The server tears the connection down while going down; a channel
        // failure after the command was issued is not an error here.
        match self
            .run_on_channel(&mut slot, &ConsoleCommand::fire_and_forget(["stop"]))
            .await
        {
            Ok(_) => {}
            Err(SupervisorError::Channel(e)) => {
                debug!(error = %e, "channel dropped while stopping");
            }
            Err(e) => return Err(e),
        }

        if let Some(mut alive) = alive {
            while *alive.borrow() {
                if alive.changed().await.is_err() {
                    break;
                }
            }
        }
        if let Some(mut channel) = slot.take() {
            channel.close().await;
        }
        Ok(StopOutcome {
            ok: true,
            detail: None,
        })
    }

    /// Forcefully terminate the child (operator teardown path) and await
    /// the exit waiter.
    pub async fn terminate(&self) -> io::Result<()> {
        let Some(pid) = self.pid() else {
            return Ok(());
        };
        let alive = self.alive_watch();
        terminate_pid(pid).await?;
        if let Some(mut alive) = alive {
            while *alive.borrow() {
                if alive.changed().await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Install a running child's channel and pid directly, bypassing spawn.
    /// Test scaffolding for exercising the command paths without a real
    /// server process.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn install_channel_for_test(
        &self,
        channel: Box<dyn CommandChannel>,
        pid: u32,
    ) -> watch::Sender<bool> {
        let (alive_tx, alive_rx) = watch::channel(true);
        {
            let mut state = self.shared.state.lock().unwrap();
            state.pid = Some(pid);
            state.alive = Some(alive_rx);
        }
        *self.shared.channel.lock().await = Some(channel);
        alive_tx
    }
}

fn say_command(message: &str) -> ConsoleCommand {
    ConsoleCommand::fire_and_forget(["say", message])
}

use ResultKind::{
    AlreadyNotWhitelisted, AlreadyWhitelisted, NothingChangedBan, NothingChangedDeop,
    NothingChangedOp, NothingChangedUnban, PlayerBanned, PlayerDeopped, PlayerNotFound,
    PlayerOpped, PlayerUnbanned, PlayerUnwhitelisted, PlayerWhitelisted, SaveAllDone, SaveOff,
    SaveOn,
};

const BAN_RESULTS: &[ResultKind] = &[PlayerBanned, NothingChangedBan, PlayerNotFound];
const UNBAN_RESULTS: &[ResultKind] = &[PlayerUnbanned, NothingChangedUnban, PlayerNotFound];
const WHITELIST_RESULTS: &[ResultKind] =
    &[PlayerWhitelisted, AlreadyWhitelisted, PlayerNotFound];
const UNWHITELIST_RESULTS: &[ResultKind] =
    &[PlayerUnwhitelisted, AlreadyNotWhitelisted, PlayerNotFound];
const OP_RESULTS: &[ResultKind] = &[PlayerOpped, NothingChangedOp, PlayerNotFound];
const DEOP_RESULTS: &[ResultKind] = &[PlayerDeopped, NothingChangedDeop, PlayerNotFound];
const SAVE_OFF_RESULTS: &[ResultKind] = &[SaveOff];
const SAVE_ALL_RESULTS: &[ResultKind] = &[SaveAllDone];
const SAVE_ON_RESULTS: &[ResultKind] = &[SaveOn];

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcservd_core::CommandReply;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn temp_paths() -> (tempfile::TempDir, ServerPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = ServerPaths::new(dir.path().join("server.jar"), dir.path())
            .with_backup_path(dir.path().join("backups"));
        (dir, paths)
    }

    /// Mock channel: records issued command lines and answers from a
    /// scripted reply function.
    struct MockChannel {
        lines: Arc<StdMutex<Vec<String>>>,
        in_flight: Arc<AtomicBool>,
        overlap: Arc<AtomicBool>,
        reply: Box<dyn Fn(&str) -> Result<CommandReply, ChannelError> + Send>,
    }

    impl MockChannel {
        fn scripted(
            reply: impl Fn(&str) -> Result<CommandReply, ChannelError> + Send + 'static,
        ) -> (Self, Arc<StdMutex<Vec<String>>>) {
            let lines = Arc::new(StdMutex::new(Vec::new()));
            let channel = Self {
                lines: Arc::clone(&lines),
                in_flight: Arc::new(AtomicBool::new(false)),
                overlap: Arc::new(AtomicBool::new(false)),
                reply: Box::new(reply),
            };
            (channel, lines)
        }

        fn echoing() -> (Self, Arc<StdMutex<Vec<String>>>) {
            Self::scripted(|line| Ok(CommandReply::from_text(line.to_string())))
        }
    }

    #[async_trait]
    impl CommandChannel for MockChannel {
        async fn authenticate(&mut self, _secret: &str) -> Result<bool, ChannelError> {
            Ok(true)
        }

        async fn run(&mut self, cmd: &ConsoleCommand) -> Result<CommandReply, ChannelError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.lines.lock().unwrap().push(cmd.line());
            let reply = (self.reply)(&cmd.line());
            self.in_flight.store(false, Ordering::SeqCst);
            reply
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn query_reports_stopped_initially() {
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Rcon);
        assert_eq!(
            supervisor.query(),
            QueryOutcome {
                running: false,
                pid: None
            }
        );
    }

    #[tokio::test]
    async fn stop_when_already_stopped_does_not_touch_the_channel() {
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Rcon);
        let outcome = supervisor.stop().await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(
            outcome.detail.as_deref(),
            Some("The server process is already stopped.")
        );
    }

    #[tokio::test]
    async fn commands_fail_cleanly_when_not_running() {
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Rcon);
        let err = supervisor.say("hello").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning));
    }

    #[tokio::test]
    async fn ban_classifies_rcon_text_response() {
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Rcon);
        let (channel, lines) = MockChannel::scripted(|line| {
            assert_eq!(line, "ban Steve griefing");
            Ok(CommandReply::from_text("Banned Steve: griefing".to_string()))
        });
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let outcome = supervisor.ban("Steve", Some("griefing")).await.unwrap();
        assert_eq!(
            outcome,
            PlayerOutcome {
                ok: true,
                player: "Steve".to_string()
            }
        );
        assert_eq!(lines.lock().unwrap().as_slice(), ["ban Steve griefing"]);
    }

    #[tokio::test]
    async fn ban_of_unknown_player_is_unsuccessful_but_not_an_error() {
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Rcon);
        let (channel, _) = MockChannel::scripted(|_| {
            Ok(CommandReply::from_text("That player does not exist".to_string()))
        });
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let outcome = supervisor.ban("Nobody", None).await.unwrap();
        assert!(!outcome.ok);
    }

    #[tokio::test]
    async fn op_requires_matching_player_name() {
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Rcon);
        let (channel, _) = MockChannel::scripted(|_| {
            Ok(CommandReply::from_text(
                "Made SomeoneElse a server operator".to_string(),
            ))
        });
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let outcome = supervisor.op("Steve").await.unwrap();
        assert!(!outcome.ok);
    }

    #[tokio::test]
    async fn concurrent_commands_never_overlap_on_the_channel() {
        let (_dir, paths) = temp_paths();
        let supervisor = Arc::new(Supervisor::new(paths, Transport::Rcon));
        let (channel, lines) = MockChannel::echoing();
        let overlap = Arc::clone(&channel.overlap);
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let supervisor = Arc::clone(&supervisor);
            tasks.push(tokio::spawn(async move {
                supervisor.say(&format!("message {i}")).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(!overlap.load(Ordering::SeqCst), "interleaved channel use");
        assert_eq!(lines.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn second_backup_is_refused_immediately() {
        let (_dir, paths) = temp_paths();
        let supervisor = Arc::new(Supervisor::new(paths, Transport::Rcon));
        // Slow channel keeps the first backup holding the lock.
        let (channel, _) = MockChannel::scripted(|line| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(CommandReply::from_text(canned_save_reply(line)))
        });
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let first = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.do_backup().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = supervisor.do_backup().await.unwrap();
        assert_eq!(second, BackupOutcome::AlreadyInProgress);
        first.await.unwrap().unwrap();
    }

    fn canned_save_reply(line: &str) -> String {
        match line {
            "save-off" => "Automatic saving is now disabled".to_string(),
            "save-all" => "Saved the game".to_string(),
            "save-on" => "Automatic saving is now enabled".to_string(),
            _ => String::new(),
        }
    }

    #[tokio::test]
    async fn backup_failure_still_reenables_auto_save_exactly_once() {
        // World has no dimension directories, so the archiver exits non-zero.
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Rcon);
        let (channel, lines) = MockChannel::scripted(|line| {
            Ok(CommandReply::from_text(canned_save_reply(line)))
        });
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        fs::create_dir_all(supervisor.paths.backup_path.clone()).unwrap();
        let outcome = supervisor.do_backup().await.unwrap();
        assert!(matches!(outcome, BackupOutcome::Failed { .. }));

        let issued = lines.lock().unwrap();
        let save_on_count = issued.iter().filter(|l| l.as_str() == "save-on").count();
        assert_eq!(save_on_count, 1);
        // save-on was sent after save-off and save-all
        let off = issued.iter().position(|l| l == "save-off").unwrap();
        let on = issued.iter().position(|l| l == "save-on").unwrap();
        assert!(on > off);
    }

    #[tokio::test]
    async fn successful_backup_returns_archive_path() {
        let (dir, paths) = temp_paths();
        for dim in ["world", "world_nether", "world_the_end"] {
            fs::create_dir_all(dir.path().join(dim)).unwrap();
            fs::write(dir.path().join(dim).join("level.dat"), b"data").unwrap();
        }
        fs::create_dir_all(dir.path().join("backups")).unwrap();

        let supervisor = Supervisor::new(paths, Transport::Rcon);
        let (channel, lines) = MockChannel::scripted(|line| {
            Ok(CommandReply::from_text(canned_save_reply(line)))
        });
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let outcome = supervisor.do_backup().await.unwrap();
        let BackupOutcome::Archived { path } = outcome else {
            panic!("expected archive, got {outcome:?}");
        };
        assert!(path.exists());
        let issued = lines.lock().unwrap();
        assert!(issued.iter().any(|l| l == "say ... backup done!"));
        assert!(issued.last().is_some_and(|l| l == "say ... backup done!"));
    }

    #[tokio::test]
    async fn channel_death_mid_backup_releases_the_backup_lock() {
        let (_dir, paths) = temp_paths();
        let supervisor = Supervisor::new(paths, Transport::Console);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_reply = Arc::clone(&attempts);
        let (channel, lines) = MockChannel::scripted(move |line| {
            if line == "save-all" {
                attempts_in_reply.fetch_add(1, Ordering::SeqCst);
                return Err(ChannelError::ChildExited);
            }
            Ok(CommandReply::from_text(canned_save_reply(line)))
        });
        supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let err = supervisor.do_backup().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Channel(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            lines.lock().unwrap().as_slice(),
            ["say Backing up the world...", "save-off", "save-all"]
        );

        // The lock is released on the error path: a second attempt gets
        // past the backup lock and fails on the dead channel instead.
        let err = supervisor.do_backup().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Channel(_)));
    }

    #[tokio::test]
    async fn stop_waits_for_the_exit_watch() {
        let (_dir, paths) = temp_paths();
        let supervisor = Arc::new(Supervisor::new(paths, Transport::Rcon));
        let (channel, lines) = MockChannel::echoing();
        let alive_tx = supervisor
            .install_channel_for_test(Box::new(channel), 4242)
            .await;

        let stopper = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!stopper.is_finished());

        // Simulate the exit waiter observing termination.
        {
            let mut state = supervisor.shared.state.lock().unwrap();
            state.pid = None;
            state.rcon = None;
        }
        alive_tx.send(false).unwrap();

        let outcome = stopper.await.unwrap().unwrap();
        assert!(outcome.ok);
        assert_eq!(lines.lock().unwrap().as_slice(), ["stop"]);
    }

    #[tokio::test]
    async fn connect_with_retry_recovers_once_the_port_opens() {
        use mcservd_rcon::{Frame, KIND_COMMAND};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let (_dir, paths) = temp_paths();
        let supervisor =
            Supervisor::new(paths, Transport::Rcon).with_reconnect_delay(Duration::from_millis(50));

        // Reserve a port, then free it so the first attempt is refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let (mut stream, _) = listener.accept().await.unwrap();
            // Echo the auth request id back so authentication succeeds.
            let mut prefix = [0u8; 4];
            stream.read_exact(&mut prefix).await.unwrap();
            let size = u32::from_le_bytes(prefix) as usize;
            let mut raw = Vec::from(prefix);
            raw.resize(4 + size, 0);
            stream.read_exact(&mut raw[4..]).await.unwrap();
            let request = Frame::decode(&raw).unwrap();
            let reply = Frame::new(request.request_id, KIND_COMMAND, vec![]);
            stream.write_all(&reply.encode().unwrap()).await.unwrap();
        });

        let creds = RconCredentials {
            port,
            password: "sesame".to_string(),
        };
        let (_alive_tx, mut alive) = watch::channel(true);
        let started = std::time::Instant::now();
        supervisor
            .connect_with_retry(&creds, &mut alive)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50), "no retry happened");
    }

    #[tokio::test]
    async fn connect_with_retry_abandons_when_the_child_dies() {
        let (_dir, paths) = temp_paths();
        let supervisor =
            Supervisor::new(paths, Transport::Rcon).with_reconnect_delay(Duration::from_millis(20));

        // Nothing ever listens here.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let creds = RconCredentials {
            port,
            password: "sesame".to_string(),
        };
        let (alive_tx, mut alive) = watch::channel(true);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let _ = alive_tx.send(false);
        });

        let err = supervisor
            .connect_with_retry(&creds, &mut alive)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SupervisorError::Channel(ChannelError::ChildExited)
        ));
    }
}
