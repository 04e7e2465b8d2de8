//! Exclusive run lock — one gateway instance per profile.
//!
//! The lock is a file holding the owner's PID, created with exclusive-create
//! semantics. A lock whose recorded process is no longer alive is stale and
//! taken over.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    /// Another live instance owns the lock. Fatal to startup, not retried.
    #[error("gateway already running (pid {pid}); lock file: {path}")]
    Held { pid: u32, path: PathBuf },

    #[error("IO error on lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive ownership of the gateway runtime for one profile. Held for the
/// whole supervisor loop, including restarts; released on final exit.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Acquire the lock, taking over a stale one (dead or unreadable PID).
    /// Fails with [`LockError::Held`] while the recorded owner is alive.
    pub fn acquire(path: PathBuf) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
        }

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            match content.trim().parse::<u32>() {
                Ok(pid) if is_process_alive(pid) => {
                    return Err(LockError::Held { pid, path });
                }
                Ok(pid) => {
                    warn!(pid, path = %path.display(), "Removing stale run lock");
                    std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                }
                Err(_) => {
                    warn!(path = %path.display(), "Removing unreadable run lock");
                    std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                }
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        let pid = std::process::id();
        write!(file, "{pid}").map_err(|e| io_err(&path, e))?;
        file.flush().map_err(|e| io_err(&path, e))?;

        info!(pid, path = %path.display(), "Run lock acquired");
        Ok(Self {
            path,
            released: false,
        })
    }

    /// Release the lock by removing the file. Idempotent.
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| io_err(&self.path, e))?;
            info!(path = %self.path.display(), "Run lock released");
        }
        self.released = true;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Whether a process with the given PID is alive. On Unix this is a signal-0
/// probe. Elsewhere no probe is available, so an existing lock is treated as
/// live and never taken over.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let mut lock = RunLock::acquire(path.clone()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn acquire_fails_while_owner_is_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        std::fs::write(&path, format!("{}", std::process::id())).unwrap();

        match RunLock::acquire(path.clone()) {
            Err(LockError::Held { pid, .. }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        // A PID far beyond any default pid_max.
        std::fs::write(&path, "4000000").unwrap();

        let mut lock = RunLock::acquire(path.clone()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());
        lock.release().unwrap();
    }

    #[test]
    fn unreadable_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        std::fs::write(&path, "not a pid").unwrap();

        let mut lock = RunLock::acquire(path).unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let mut lock = RunLock::acquire(path).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn drop_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        {
            let _lock = RunLock::acquire(path.clone()).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }
}
