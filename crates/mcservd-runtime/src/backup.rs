//! Backup archiver subprocess.
//!
//! Archiving a world can run long, so it happens in a separate process
//! while the server is quiesced. The archiver's stdout and stderr are
//! captured so a failed run can be reported verbatim to the caller.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

/// World subdirectories included in every archive.
const WORLD_DIMENSIONS: [&str; 3] = ["world", "world_nether", "world_the_end"];

/// Result of one archiver run. `success` reflects the exit code.
#[derive(Debug)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Timestamped archive filename under the backup directory.
fn archive_path(backup_dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S%.6f");
    backup_dir.join(format!("{stamp}.tar.bz2"))
}

/// Run the archiver over the world's dimension directories.
///
/// Spawns `tar -cjf` with the world path as working directory and waits for
/// completion. An `Err` here means the archiver could not even be spawned;
/// an unsuccessful run is reported through [`ArchiveReport`].
pub async fn run_archiver(world_path: &Path, backup_dir: &Path) -> io::Result<ArchiveReport> {
    let path = archive_path(backup_dir);
    debug!(archive = %path.display(), "starting archiver");

    let output = Command::new("tar")
        .arg("-cjf")
        .arg(&path)
        .args(WORLD_DIMENSIONS)
        .current_dir(world_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let report = ArchiveReport {
        path,
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    if report.success {
        info!(archive = %report.path.display(), "world archived");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn archives_the_dimension_directories() {
        let world = tempfile::tempdir().unwrap();
        for dim in WORLD_DIMENSIONS {
            fs::create_dir(world.path().join(dim)).unwrap();
            fs::write(world.path().join(dim).join("level.dat"), b"data").unwrap();
        }
        let backups = tempfile::tempdir().unwrap();

        let report = run_archiver(world.path(), backups.path()).await.unwrap();
        assert!(report.success, "stderr: {}", report.stderr);
        assert!(report.path.exists());
    }

    #[tokio::test]
    async fn reports_failure_with_captured_stderr() {
        // No dimension directories: tar exits non-zero and complains.
        let world = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();

        let report = run_archiver(world.path(), backups.path()).await.unwrap();
        assert!(!report.success);
        assert_ne!(report.exit_code, Some(0));
        assert!(!report.stderr.is_empty());
    }
}
