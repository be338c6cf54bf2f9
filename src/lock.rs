//! Single-instance lock
//!
//! A lock file holding the owner's PID, created exclusively. Two
//! daemons fighting over audio routing would flap endlessly, so a
//! second instance refuses to start. A file left by a dead process
//! (crash, power loss) is detected through the process table and
//! broken.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::procs::ProcessScanner;

pub const LOCK_FILE: &str = "daemon.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another instance is already running (pid {0})")]
    Held(u32),

    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock under `dir`, breaking a stale one whose owner died
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        let path = dir.join(LOCK_FILE);
        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| raw.trim().parse::<u32>().ok());
                match holder {
                    Some(pid) if ProcessScanner::new().pid_alive(pid) => {
                        Err(LockError::Held(pid))
                    }
                    Some(pid) => {
                        warn!(pid, "breaking stale lock left by dead process");
                        std::fs::remove_file(&path)?;
                        Self::try_create(&path).map_err(LockError::Io)
                    }
                    None => {
                        warn!("breaking unreadable lock file");
                        std::fs::remove_file(&path)?;
                        Self::try_create(&path).map_err(LockError::Io)
                    }
                }
            }
            Err(e) => Err(LockError::Io(e)),
        }
    }

    fn try_create(path: &Path) -> Result<Self, std::io::Error> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        write!(file, "{}", std::process::id())?;
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Remove only our own file; a racing instance may have broken
        // and rewritten it after we lost a kill signal
        let ours = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            == Some(std::process::id());
        if ours {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = InstanceLock::acquire(dir.path()).unwrap();
        let err = InstanceLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, LockError::Held(pid) if pid == std::process::id()));
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), u32::MAX.to_string()).unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        drop(lock);
    }

    #[test]
    fn test_garbage_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "not a pid").unwrap();
        assert!(InstanceLock::acquire(dir.path()).is_ok());
    }
}
