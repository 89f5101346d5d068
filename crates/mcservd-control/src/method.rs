//! The control-protocol method allow-list.
//!
//! Requests name methods as strings; dispatch only ever goes through this
//! enum, so an unlisted name is rejected before it can touch anything.

use std::fmt;
use std::ops::RangeInclusive;

/// Allow-listed supervisor operations reachable over the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Start,
    Query,
    DoBackup,
    Say,
    Ban,
    Unban,
    Whitelist,
    Unwhitelist,
    Op,
    Deop,
    Stop,
    Pid,
}

impl Method {
    pub const ALL: [Self; 12] = [
        Self::Start,
        Self::Query,
        Self::DoBackup,
        Self::Say,
        Self::Ban,
        Self::Unban,
        Self::Whitelist,
        Self::Unwhitelist,
        Self::Op,
        Self::Deop,
        Self::Stop,
        Self::Pid,
    ];

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Query => "query",
            Self::DoBackup => "do_backup",
            Self::Say => "say",
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Whitelist => "whitelist",
            Self::Unwhitelist => "unwhitelist",
            Self::Op => "op",
            Self::Deop => "deop",
            Self::Stop => "stop",
            Self::Pid => "pid",
        }
    }

    /// Accepted positional-argument counts.
    #[must_use]
    pub const fn arity(self) -> RangeInclusive<usize> {
        match self {
            Self::Start | Self::Query | Self::DoBackup | Self::Stop | Self::Pid => 0..=0,
            Self::Say
            | Self::Unban
            | Self::Whitelist
            | Self::Unwhitelist
            | Self::Op
            | Self::Deop => 1..=1,
            Self::Ban => 1..=2,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
