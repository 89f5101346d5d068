//! `server.properties` reader/writer.
//!
//! The server's configuration store is a key=value text file. Lines without
//! an `=` (comments, blanks) are preserved verbatim in their original
//! position, and key order survives a load/save round trip.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::info;

/// Default RCON port forced into the config when none is set.
pub const DEFAULT_RCON_PORT: u16 = 25575;

const PROPERTIES_FILE: &str = "server.properties";

#[derive(Debug, Clone)]
enum Line {
    Pair { key: String, value: String },
    Raw(String),
}

/// Order-preserving view of one `server.properties` file.
#[derive(Debug)]
pub struct ServerProperties {
    path: PathBuf,
    lines: Vec<Line>,
}

impl ServerProperties {
    /// Load the properties file from a world directory. A missing file
    /// yields an empty store that `save` will create.
    pub fn load(world_path: &Path) -> io::Result<Self> {
        let path = world_path.join(PROPERTIES_FILE);
        let mut lines = Vec::new();
        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                let line = line.trim();
                match line.split_once('=') {
                    Some((key, value)) => lines.push(Line::Pair {
                        key: key.to_string(),
                        value: value.to_string(),
                    }),
                    None => lines.push(Line::Raw(line.to_string())),
                }
            }
        }
        Ok(Self { path, lines })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a key, updating it in place or appending it at the end.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let Line::Pair { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.lines.push(Line::Pair {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Write the file back out, preserving raw lines and key order.
    pub fn save(&self) -> io::Result<()> {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Pair { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
                Line::Raw(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        fs::write(&self.path, out)
    }
}

/// 48 random bytes, base64-encoded. Sourced from uuid v4s so the workspace
/// carries no direct rand dependency.
fn generate_password() -> String {
    let mut bytes = Vec::with_capacity(48);
    for _ in 0..3 {
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    }
    STANDARD.encode(bytes)
}

/// Force-enable the remote console in the world's configuration store.
///
/// Ensures `enable-rcon=true`, a port, and a non-empty random password,
/// persisting the file only when something actually changed. Returns the
/// effective `(port, password)` pair. Must run before the child is spawned
/// so the server picks the credentials up.
pub fn force_enable_rcon(world_path: &Path) -> io::Result<(u16, String)> {
    let mut config = ServerProperties::load(world_path)?;
    let mut changed = false;

    if config.get("enable-rcon") != Some("true") {
        config.set("enable-rcon", "true");
        changed = true;
    }
    if !config.contains("rcon.port") {
        config.set("rcon.port", &DEFAULT_RCON_PORT.to_string());
        changed = true;
    }
    if config.get("rcon.password").is_none_or(str::is_empty) {
        config.set("rcon.password", &generate_password());
        changed = true;
    }

    if changed {
        config.save()?;
        info!(path = %world_path.display(), "rcon settings written to server.properties");
    }

    let port = config
        .get("rcon.port")
        .unwrap_or_default()
        .parse::<u16>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad rcon.port: {e}")))?;
    let password = config.get("rcon.password").unwrap_or_default().to_string();
    Ok((port, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_comments_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROPERTIES_FILE);
        fs::write(&path, "#comment\nmotd=A Server\n\nlevel-name=world\n").unwrap();

        let mut config = ServerProperties::load(dir.path()).unwrap();
        config.set("motd", "Another Server");
        config.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "#comment\nmotd=Another Server\n\nlevel-name=world\n");
    }

    #[test]
    fn set_appends_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerProperties::load(dir.path()).unwrap();
        config.set("enable-rcon", "true");
        config.save().unwrap();

        let reloaded = ServerProperties::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("enable-rcon"), Some("true"));
    }

    #[test]
    fn force_enable_rcon_fills_all_three_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (port, password) = force_enable_rcon(dir.path()).unwrap();
        assert_eq!(port, DEFAULT_RCON_PORT);
        assert!(!password.is_empty());

        let config = ServerProperties::load(dir.path()).unwrap();
        assert_eq!(config.get("enable-rcon"), Some("true"));
        assert_eq!(config.get("rcon.port"), Some("25575"));
        assert_eq!(config.get("rcon.password"), Some(password.as_str()));
    }

    #[test]
    fn force_enable_rcon_keeps_existing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PROPERTIES_FILE),
            "enable-rcon=true\nrcon.port=25599\nrcon.password=sesame\n",
        )
        .unwrap();

        let (port, password) = force_enable_rcon(dir.path()).unwrap();
        assert_eq!(port, 25599);
        assert_eq!(password, "sesame");
    }

    #[test]
    fn generated_passwords_differ() {
        assert_ne!(generate_password(), generate_password());
    }
}
