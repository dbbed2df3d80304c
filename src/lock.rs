//! Cross-process lock for an on-disk project root
//!
//! Several build processes may archive into and reconcile the same project
//! directory. Each command holds this advisory lock while it reads history,
//! writes history and deletes stores. The lock waits with a timeout, warns
//! once on contention and is released on drop.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {0:?} waiting for project lock")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Advisory lock on a project root, released on drop.
#[derive(Debug)]
pub struct ProjectLock {
    lock_path: PathBuf,
    #[allow(dead_code)]
    lock_file: File,
}

impl ProjectLock {
    /// Lock file name
    pub const LOCK_FILENAME: &'static str = ".ci_artifacts.lock";

    /// Acquire the lock on `root`, creating the directory if needed.
    pub fn acquire(root: &Path, timeout: Duration) -> LockResult<Self> {
        fs::create_dir_all(root)?;

        let lock_path = root.join(Self::LOCK_FILENAME);
        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);
        let mut warned = false;

        loop {
            match Self::try_acquire_exclusive(&lock_path) {
                Ok(file) => {
                    if warned {
                        info!(
                            path = %lock_path.display(),
                            waited_secs = start.elapsed().as_secs_f64(),
                            "project lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        lock_path,
                        lock_file: file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Duration::from_millis(500) {
                        warn!(path = %lock_path.display(), "project lock contention, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout(timeout));
            }

            std::thread::sleep(poll_interval);
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    #[cfg(unix)]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

        if result == 0 {
            Ok(file)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            } else {
                Err(err)
            }
        }
    }

    #[cfg(not(unix))]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(not(unix))]
impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("project");

        let lock = ProjectLock::acquire(&root, Duration::from_secs(1)).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let _held = ProjectLock::acquire(dir.path(), Duration::from_secs(1)).unwrap();

        let result = ProjectLock::acquire(dir.path(), Duration::from_millis(100));
        assert!(matches!(result, Err(LockError::Timeout(_))));
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let _lock = ProjectLock::acquire(dir.path(), Duration::from_secs(1)).unwrap();
        }
        assert!(ProjectLock::acquire(dir.path(), Duration::from_millis(100)).is_ok());
    }
}
