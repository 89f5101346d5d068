//! Process supervision and OS-level concerns for mcservd.
//!
//! This crate owns the child process: spawning it, watching it die,
//! keeping a command channel to it alive across reconnects, quiescing it
//! for backups, and tearing it down on operator interrupt.

pub mod backup;
pub mod channel;
pub mod classifier;
pub mod properties;
pub mod shutdown;
pub mod supervisor;

pub use channel::{ConsoleChannel, RconChannel};
pub use classifier::{ResultQueue, spawn_console_classifier};
pub use properties::{ServerProperties, force_enable_rcon};
pub use supervisor::{
    BackupOutcome, PlayerOutcome, QueryOutcome, ServerPaths, StartOutcome, StopOutcome, Supervisor,
    SupervisorError, Transport,
};
