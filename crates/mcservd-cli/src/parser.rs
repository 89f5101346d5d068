//! Top-level CLI parser and subcommand definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

/// Command-line interface for the server supervisor daemon.
///
/// `serve` runs the daemon; every other subcommand talks to a running
/// daemon over the control socket.
#[derive(Parser)]
#[command(name = "mcservd")]
#[command(about = "Supervise and administer a game server process")]
#[command(version)]
pub struct Cli {
    /// Control socket path
    #[arg(
        short = 's',
        long = "socket",
        global = true,
        env = "MCSERVD_SOCKET",
        default_value = "/tmp/mcservd.sock"
    )]
    pub socket: PathBuf,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervisor daemon and its control socket
    Serve {
        /// World directory (the child's working directory)
        #[arg(short = 'w', long = "world")]
        world: PathBuf,

        /// Server jar to launch
        #[arg(short = 'j', long = "jar")]
        jar: PathBuf,

        /// Java executable to launch the jar with
        #[arg(long, default_value = "java")]
        java: String,

        /// Backup archive directory (defaults to <world>/backups)
        #[arg(long = "backup-dir")]
        backup_dir: Option<PathBuf>,

        /// Drive the server over its console pipes instead of RCON
        #[arg(long)]
        console: bool,
    },

    /// Accept the server EULA by writing eula=true into the world
    AcceptEula {
        /// World directory containing eula.txt
        #[arg(short = 'w', long = "world")]
        world: PathBuf,
    },

    /// Start the server process
    Start,

    /// Report whether the server process is running, and its pid
    Query,

    /// Print the raw server pid, if any
    Pid,

    /// Archive the world directories
    Backup,

    /// Broadcast a chat message to all players
    Say {
        /// Message text (joined with spaces)
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Ban a player
    Ban {
        player: String,
        reason: Option<String>,
    },

    /// Lift a player's ban
    Unban { player: String },

    /// Add a player to the whitelist
    Whitelist { player: String },

    /// Remove a player from the whitelist
    Unwhitelist { player: String },

    /// Grant a player operator status
    Op { player: String },

    /// Revoke a player's operator status
    Deop { player: String },

    /// Stop the server process
    Stop,
}

impl Commands {
    /// The control request this subcommand sends, or `None` for the
    /// commands that don't talk to a running daemon.
    #[must_use]
    pub fn request(&self) -> Option<Vec<Value>> {
        let request = match self {
            Self::Serve { .. } | Self::AcceptEula { .. } => return None,
            Self::Start => vec![json!("start")],
            Self::Query => vec![json!("query")],
            Self::Pid => vec![json!("pid")],
            Self::Backup => vec![json!("do_backup")],
            Self::Stop => vec![json!("stop")],
            Self::Say { message } => vec![json!("say"), json!(message.join(" "))],
            Self::Ban { player, reason } => {
                let mut request = vec![json!("ban"), json!(player)];
                if let Some(reason) = reason {
                    request.push(json!(reason));
                }
                request
            }
            Self::Unban { player } => vec![json!("unban"), json!(player)],
            Self::Whitelist { player } => vec![json!("whitelist"), json!(player)],
            Self::Unwhitelist { player } => vec![json!("unwhitelist"), json!(player)],
            Self::Op { player } => vec![json!("op"), json!(player)],
            Self::Deop { player } => vec![json!("deop"), json!(player)],
        };
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_args_parse_before_the_subcommand() {
        let cli = Cli::parse_from(["mcservd", "-v", "-s", "/run/mc.sock", "query"]);
        assert!(cli.verbose);
        assert_eq!(cli.socket, PathBuf::from("/run/mc.sock"));
    }

    #[test]
    fn say_joins_its_words_into_one_argument() {
        let cli = Cli::parse_from(["mcservd", "say", "hello", "there"]);
        let request = cli.command.request().unwrap();
        assert_eq!(request, vec![json!("say"), json!("hello there")]);
    }

    #[test]
    fn ban_reason_is_optional() {
        let cli = Cli::parse_from(["mcservd", "ban", "Steve"]);
        assert_eq!(
            cli.command.request().unwrap(),
            vec![json!("ban"), json!("Steve")]
        );

        let cli = Cli::parse_from(["mcservd", "ban", "Steve", "griefing"]);
        assert_eq!(
            cli.command.request().unwrap(),
            vec![json!("ban"), json!("Steve"), json!("griefing")]
        );
    }

    #[test]
    fn missing_required_arguments_fail_to_parse() {
        assert!(Cli::try_parse_from(["mcservd", "say"]).is_err());
        assert!(Cli::try_parse_from(["mcservd", "op"]).is_err());
        assert!(Cli::try_parse_from(["mcservd", "serve", "-w", "/srv/world"]).is_err());
    }

    #[test]
    fn serve_has_no_control_request() {
        let cli = Cli::parse_from([
            "mcservd", "serve", "-w", "/srv/world", "-j", "/srv/server.jar",
        ]);
        assert!(cli.command.request().is_none());
    }
}
