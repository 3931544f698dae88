//! Single-instance guard
//!
//! The interactive UI records its PID as `running_pid` in `config.json`.
//! A second launch refuses to start while that process is alive; the
//! guard clears the record again when dropped.

use std::process::{Command, Stdio};

use anyhow::{bail, Result};

use crate::storage::ConfigDir;

/// Returns true if a process with `pid` exists
pub fn is_process_running(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

/// Holds the `running_pid` record for the lifetime of the UI
pub struct PidGuard {
    dir: ConfigDir,
    pid: u32,
}

impl PidGuard {
    /// Records this process, failing if another live instance is recorded
    pub fn acquire(dir: &ConfigDir) -> Result<Self> {
        Self::acquire_as(dir, std::process::id())
    }

    fn acquire_as(dir: &ConfigDir, pid: u32) -> Result<Self> {
        let config = dir.load_config()?;
        let recorded = config.running_pid;
        if recorded != 0 && recorded != pid && is_process_running(recorded) {
            bail!(
                "lifelog is already running (pid {}); close it first or remove running_pid from {}",
                recorded,
                dir.config_file().display()
            );
        }
        if recorded != 0 && recorded != pid {
            tracing::info!(stale_pid = recorded, "clearing stale running_pid");
        }

        dir.update_config(|c| c.running_pid = pid)?;
        tracing::debug!(pid, "running_pid recorded");
        Ok(Self {
            dir: dir.clone(),
            pid,
        })
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let pid = self.pid;
        let result = self.dir.update_config(|c| {
            if c.running_pid == pid {
                c.running_pid = 0;
            }
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to clear running_pid");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn current_process_is_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(0));
    }

    #[test]
    fn guard_records_and_clears_pid() {
        let temp = TempDir::new().unwrap();
        let dir = ConfigDir::new(temp.path());

        let guard = PidGuard::acquire(&dir).unwrap();
        assert_eq!(dir.load_config().unwrap().running_pid, std::process::id());
        drop(guard);
        assert_eq!(dir.load_config().unwrap().running_pid, 0);
    }

    #[test]
    fn live_instance_blocks_second_launch() {
        let temp = TempDir::new().unwrap();
        let dir = ConfigDir::new(temp.path());
        // Pretend this test process is another instance.
        dir.update_config(|c| c.running_pid = std::process::id()).unwrap();

        let err = PidGuard::acquire_as(&dir, u32::MAX - 1).err().unwrap();
        assert!(err.to_string().contains("already running"));
    }

    #[test]
    fn stale_pid_is_replaced() {
        let temp = TempDir::new().unwrap();
        let dir = ConfigDir::new(temp.path());
        dir.update_config(|c| c.running_pid = u32::MAX - 1).unwrap();

        let _guard = PidGuard::acquire(&dir).unwrap();
        assert_eq!(dir.load_config().unwrap().running_pid, std::process::id());
    }
}
