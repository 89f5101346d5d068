//! Control-socket server: accept loop and allow-listed dispatch.
//!
//! Each connection is short-lived: one request in, one reply out. The
//! server never takes locks of its own; concurrent method calls are
//! serialized by the supervisor's internal locking, so slow operations
//! (start, do_backup) simply queue behind each other while query-style
//! calls stay lock-free.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mcservd_runtime::{BackupOutcome, PlayerOutcome, Supervisor, SupervisorError};

use crate::method::Method;
use crate::wire::{read_request, write_reply};

/// Dispatch failures. Every variant collapses into the
/// `[false, null, description]` reply; nothing here crashes the server.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown method {0:?}")]
    UnknownMethod(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{method} takes {expected} argument(s), got {got}")]
    WrongArity {
        method: Method,
        expected: String,
        got: usize,
    },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Listener bound to a filesystem socket path.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind the control socket.
    ///
    /// A leftover socket file from a crashed daemon is detected by probing
    /// it with a connect: if nobody answers, the stale file is removed and
    /// the path reused. If something does answer, another daemon owns it.
    pub async fn bind(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if path.exists() {
            match UnixStream::connect(&path).await {
                Ok(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("control socket {} is already served", path.display()),
                    ));
                }
                Err(e) => {
                    debug!(path = %path.display(), probe_error = %e, "removing stale control socket");
                    std::fs::remove_file(&path)?;
                }
            }
        }
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "control socket bound");
        Ok(Self { listener, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until cancelled, then remove the socket file.
    pub async fn run(self, supervisor: Arc<Supervisor>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let supervisor = Arc::clone(&supervisor);
                        tokio::spawn(handle_connection(stream, supervisor));
                    }
                    Err(e) => {
                        warn!(error = %e, "control accept failed");
                    }
                },
            }
        }
        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "control socket file not removed");
        }
        info!("control server stopped");
    }
}

/// One request/reply exchange. Every failure mode collapses into the
/// `[false, null, description]` reply shape; only an unwritable stream
/// ends the exchange silently.
async fn handle_connection(mut stream: UnixStream, supervisor: Arc<Supervisor>) {
    let reply = match read_request(&mut stream).await {
        Ok(elements) => dispatch(&supervisor, elements)
            .await
            .unwrap_or_else(|e| error_reply(&e.to_string())),
        Err(e) => error_reply(&e.to_string()),
    };
    if let Err(e) = write_reply(&mut stream, &reply).await {
        debug!(error = %e, "control reply not delivered");
        return;
    }
    let _ = stream.shutdown().await;
}

fn error_reply(description: &str) -> Vec<Value> {
    vec![json!(false), Value::Null, json!(description)]
}

fn player_reply(outcome: PlayerOutcome) -> Vec<Value> {
    vec![json!(true), json!(outcome.ok), json!(outcome.player)]
}

/// Parse `[method, ...args]`, check the allow-list and arity, and call the
/// named supervisor operation.
async fn dispatch(
    supervisor: &Supervisor,
    elements: Vec<Value>,
) -> Result<Vec<Value>, ControlError> {
    let Some(name) = elements.first().and_then(Value::as_str) else {
        return Err(ControlError::BadRequest(
            "method name must be a string".to_string(),
        ));
    };
    let method = Method::from_name(name)
        .ok_or_else(|| ControlError::UnknownMethod(name.to_string()))?;

    let args = &elements[1..];
    if !method.arity().contains(&args.len()) {
        let arity = method.arity();
        return Err(ControlError::WrongArity {
            method,
            expected: if arity.start() == arity.end() {
                arity.start().to_string()
            } else {
                format!("{} to {}", arity.start(), arity.end())
            },
            got: args.len(),
        });
    }
    let mut strings = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        match arg.as_str() {
            Some(s) => strings.push(s),
            None => {
                return Err(ControlError::BadRequest(format!(
                    "argument {} of {method} must be a string",
                    i + 1
                )));
            }
        }
    }

    debug!(%method, args = ?strings, "dispatching control request");
    let reply = match method {
        Method::Start => {
            let o = supervisor.start().await?;
            vec![json!(true), json!(o.ok), json!(o.detail)]
        }
        Method::Query => {
            let o = supervisor.query();
            vec![json!(true), json!(o.running), json!(o.pid)]
        }
        Method::Pid => vec![json!(true), json!(supervisor.query().pid)],
        // say always succeeds once issued and names no player, hence the
        // fixed (true, null) result tuple.
        Method::Say => {
            supervisor.say(strings[0]).await?;
            vec![json!(true), json!(true), Value::Null]
        }
        Method::Ban => player_reply(supervisor.ban(strings[0], strings.get(1).copied()).await?),
        Method::Unban => player_reply(supervisor.unban(strings[0]).await?),
        Method::Whitelist => player_reply(supervisor.whitelist(strings[0]).await?),
        Method::Unwhitelist => player_reply(supervisor.unwhitelist(strings[0]).await?),
        Method::Op => player_reply(supervisor.op(strings[0]).await?),
        Method::Deop => player_reply(supervisor.deop(strings[0]).await?),
        Method::DoBackup => match supervisor.do_backup().await? {
            BackupOutcome::Archived { path } => {
                vec![json!(true), json!(true), json!(path.display().to_string())]
            }
            BackupOutcome::AlreadyInProgress => {
                vec![json!(true), json!(false), json!("Backup is already in progress.")]
            }
            BackupOutcome::Failed {
                detail,
                stdout,
                stderr,
            } => vec![
                json!(true),
                json!(false),
                json!(detail),
                json!(stdout),
                json!(stderr),
            ],
        },
        Method::Stop => {
            let o = supervisor.stop().await?;
            vec![json!(true), json!(o.ok), json!(o.detail)]
        }
    };
    Ok(reply)
}
