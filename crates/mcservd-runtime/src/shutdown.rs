//! Forced child termination by PID with SIGTERM → SIGKILL escalation.
//!
//! The exit waiter owns the `Child` handle, so the teardown path kills by
//! pid and lets the waiter do the reaping.

use std::io;

#[cfg(unix)]
use std::time::Duration;
#[cfg(unix)]
use tokio::time::sleep;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Terminate a process by PID.
///
/// Sends SIGTERM, polls for up to 5 seconds, then escalates to SIGKILL.
/// Does not reap: the supervisor's exit waiter holds the `Child` and
/// observes the exit. `Ok(())` if the process died or was already gone.
pub async fn terminate_pid(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        terminate_unix(pid).await
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(io::Error::other("pid termination unsupported on this platform"))
    }
}

#[cfg(unix)]
async fn terminate_unix(pid: u32) -> io::Result<()> {
    let nix_pid = Pid::from_raw(i32::try_from(pid).map_err(io::Error::other)?);

    match signal::kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()), // already gone
        Err(e) => return Err(io::Error::other(e)),
    }

    // Grace period before escalating.
    for _ in 0..50 {
        sleep(Duration::from_millis(100)).await;
        if !process_exists(nix_pid) {
            return Ok(());
        }
    }

    match signal::kill(nix_pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

#[cfg(unix)]
fn process_exists(pid: Pid) -> bool {
    signal::kill(pid, None).is_ok()
}
