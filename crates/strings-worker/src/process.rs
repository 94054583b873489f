//! Process-group cleanup for tool subprocesses.

use tracing::debug;

/// Kills the whole process group of a spawned tool when dropped.
///
/// The tool is spawned as a group leader, so its id is also the group id
/// and every descendant it forks is reached by one signal.
#[derive(Debug)]
pub(crate) struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    pub(crate) fn new(pgid: Option<u32>) -> Self {
        ProcessGroupGuard { pgid }
    }

    pub(crate) fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    // SAFETY: plain signal delivery to a group we created. A group id is not
    // reissued while any member is alive, even after the leader is reaped.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    } else {
        debug!(pgid, "Killed tool process group");
    }
}

#[cfg(not(unix))]
fn kill_group(pgid: u32) {
    debug!(pgid, "Process groups unsupported, relying on kill_on_drop");
}

/// Poll `/proc` until `pid` is gone or a zombie.
#[cfg(all(test, target_os = "linux"))]
pub(crate) async fn wait_until_gone(pid: u32, limit: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let alive = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        };
        if !alive {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
