//! PID file guard against starting the supervisor twice.
//!
//! The file holds the supervisor's PID followed by a newline. A file whose
//! process is gone is treated as stale and replaced.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, TmsError};

const SETTLE_ATTEMPTS: u32 = 25;
const SETTLE_INTERVAL: Duration = Duration::from_millis(20);
#[cfg(unix)]
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Reads the PID recorded in `path`. A missing file yields `None`.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(content) => parse_pid(path, &content).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_pid(path: &Path, content: &str) -> Result<u32> {
    let invalid = |message: String| TmsError::InvalidPidFile {
        path: path.display().to_string(),
        message,
    };
    let pid: u32 = content
        .trim()
        .parse()
        .map_err(|_| invalid(format!("'{}' is not a PID", content.trim())))?;
    if pid == 0 {
        return Err(invalid("PID 0 is not a process".to_string()));
    }
    Ok(pid)
}

/// `kill(pid, 0)`: a process we may not signal still exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| TmsError::SpawnFailed(format!("PID {} out of range", pid)))?;
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().into())
    }
}

/// Holds the PID file for the lifetime of the supervisor.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Creates `path` exclusively and writes the current PID to it,
    /// refusing if a live process owns it.
    ///
    /// A file left by a dead process, or one that never got a valid PID, is
    /// removed and creation retried once.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let pid = std::process::id();
        let mut retried = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", pid)?;
                    file.sync_all()?;
                    info!(pid, path = %path.display(), "PID file written");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && !retried => {
                    retried = true;
                    clear_stale(path)?;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    // Lost a race with another supervisor starting right now
                    return match read_settled(path)? {
                        Some(owner) => Err(TmsError::AlreadyRunning(owner)),
                        None => Err(TmsError::InvalidPidFile {
                            path: path.display().to_string(),
                            message: "claimed concurrently by another process".to_string(),
                        }),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Removes an existing PID file unless a live process owns it.
fn clear_stale(path: &Path) -> Result<()> {
    match read_settled(path) {
        Ok(Some(owner)) if is_process_alive(owner) => Err(TmsError::AlreadyRunning(owner)),
        Ok(Some(owner)) => {
            warn!(pid = owner, path = %path.display(), "Removing stale PID file");
            remove_if_present(path)
        }
        Ok(None) => Ok(()),
        Err(TmsError::InvalidPidFile { message, .. }) => {
            warn!(path = %path.display(), "Replacing corrupt PID file: {}", message);
            remove_if_present(path)
        }
        Err(e) => Err(e),
    }
}

/// Like `read_pid`, but gives a concurrent writer a moment to fill in a file
/// it has just created. A file still empty after that is corrupt.
fn read_settled(path: &Path) -> Result<Option<u32>> {
    for _ in 0..SETTLE_ATTEMPTS {
        match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => {
                std::thread::sleep(SETTLE_INTERVAL);
            }
            Ok(content) => return parse_pid(path, &content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
    Err(TmsError::InvalidPidFile {
        path: path.display().to_string(),
        message: "file is empty".to_string(),
    })
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Leave the file alone if another supervisor has since claimed it.
        match read_pid(&self.path) {
            Ok(Some(pid)) if pid == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), "Failed to remove PID file: {}", e);
                } else {
                    debug!(path = %self.path.display(), "PID file removed");
                }
            }
            _ => debug!(path = %self.path.display(), "PID file no longer ours, leaving it"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    StalePidRemoved,
    Stopped,
    Killed,
    StillRunning,
}

/// Stops the process recorded in `pid_file`: SIGTERM, wait `grace`, then
/// SIGKILL when `force` is set.
#[cfg(unix)]
pub async fn stop_recorded(pid_file: &Path, grace: Duration, force: bool) -> Result<StopOutcome> {
    let Some(pid) = read_pid(pid_file)? else {
        return Ok(StopOutcome::NotRunning);
    };

    if !is_process_alive(pid) {
        warn!(pid, "Process not running, removing stale PID file");
        fs::remove_file(pid_file)?;
        return Ok(StopOutcome::StalePidRemoved);
    }

    info!(pid, "Sending SIGTERM");
    send_signal(pid, libc::SIGTERM)?;
    if wait_for_exit(pid, grace).await {
        return Ok(StopOutcome::Stopped);
    }

    if !force {
        warn!(pid, "Process still running after {:?}", grace);
        return Ok(StopOutcome::StillRunning);
    }

    warn!(pid, "Grace period elapsed, sending SIGKILL");
    send_signal(pid, libc::SIGKILL)?;
    if wait_for_exit(pid, STOP_POLL_INTERVAL * 10).await {
        // A killed supervisor cannot clean up after itself.
        remove_if_present(pid_file)?;
        Ok(StopOutcome::Killed)
    } else {
        Ok(StopOutcome::StillRunning)
    }
}

#[cfg(not(unix))]
pub async fn stop_recorded(_pid_file: &Path, _grace: Duration, _force: bool) -> Result<StopOutcome> {
    Err(TmsError::ConfigError(
        "stopping by PID file requires a unix platform".into(),
    ))
}

#[cfg(unix)]
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_pid_handles_missing_and_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tms.pid");
        assert_eq!(read_pid(&path).unwrap(), None);

        fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(4242));
    }

    #[test]
    fn read_pid_rejects_garbage_and_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tms.pid");
        fs::write(&path, "not_a_number").unwrap();
        assert!(matches!(
            read_pid(&path),
            Err(TmsError::InvalidPidFile { .. })
        ));
        fs::write(&path, "0").unwrap();
        assert!(read_pid(&path).is_err());
    }

    #[test]
    fn empty_file_is_settled_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tms.pid");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            read_settled(&path),
            Err(TmsError::InvalidPidFile { .. })
        ));
        assert_eq!(read_settled(&dir.path().join("absent.pid")).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
    }
}
