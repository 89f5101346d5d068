//! Daemon entry point and control-request client - the composition root.
//!
//! `serve` wires the supervisor, the control server and signal teardown
//! together; every other subcommand is a one-shot control client.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mcservd_cli::{Cli, Commands, accept_eula};
use mcservd_control::{ControlServer, send_request};
use mcservd_runtime::{ServerPaths, Supervisor, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            world,
            jar,
            java,
            backup_dir,
            console,
        } => {
            serve(&cli.socket, world, jar, java, backup_dir, console).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::AcceptEula { world } => {
            accept_eula(&world)?;
            println!("EULA accepted in {}", world.join("eula.txt").display());
            Ok(ExitCode::SUCCESS)
        }
        command => run_client(&cli.socket, &command).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

/// Run the daemon until an operator interrupt, then tear the child down.
async fn serve(
    socket: &Path,
    world: PathBuf,
    jar: PathBuf,
    java: String,
    backup_dir: Option<PathBuf>,
    console: bool,
) -> anyhow::Result<()> {
    let mut paths = ServerPaths::new(jar, world).with_java(java);
    if let Some(dir) = backup_dir {
        paths = paths.with_backup_path(dir);
    }
    let transport = if console {
        Transport::Console
    } else {
        Transport::Rcon
    };

    let supervisor = Arc::new(Supervisor::new(paths, transport));
    let server = ControlServer::bind(socket)
        .await
        .with_context(|| format!("binding control socket {}", socket.display()))?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    info!(socket = %socket.display(), "daemon ready");
    server.run(Arc::clone(&supervisor), cancel).await;

    // The listener is gone; nothing new can reach the supervisor.
    info!("terminating server process");
    if let Err(e) = supervisor.terminate().await {
        error!(error = %e, "server process did not terminate cleanly");
    }
    Ok(())
}

/// First SIGINT/SIGTERM cancels the token; repeats are no-ops because the
/// token is already cancelled.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                error!("SIGTERM handler could not be installed");
                return;
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("interrupt received; shutting down");
        cancel.cancel();
    });
}

/// Send one control request and print the decoded reply.
async fn run_client(socket: &Path, command: &Commands) -> anyhow::Result<ExitCode> {
    let request = command
        .request()
        .context("subcommand does not map to a control request")?;

    let reply = send_request(socket, &request).await?;
    let ok = render_reply(&reply);
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Print a reply array; returns whether it reports overall success.
///
/// `[false, null, description]` is a dispatch failure; `[true, false, ...]`
/// means the operation ran but didn't succeed (player not found, backup
/// already in progress). Both exit non-zero.
fn render_reply(reply: &[Value]) -> bool {
    let dispatched = reply.first().and_then(Value::as_bool).unwrap_or(false);
    if !dispatched {
        let description = reply
            .get(2)
            .and_then(Value::as_str)
            .unwrap_or("malformed reply");
        eprintln!("Error: {description}");
        return false;
    }

    let results = &reply[1..];
    if results.is_empty() {
        println!("ok");
        return true;
    }
    let rendered: Vec<String> = results
        .iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            Value::Null => "-".to_string(),
            other => other.to_string(),
        })
        .collect();
    println!("{}", rendered.join(" "));

    results.first().and_then(Value::as_bool).unwrap_or(true)
}
