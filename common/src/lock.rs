//! Write locks that hold across processes: the API and the admin CLI share one data dir.

use crate::error::{Error, LockTimeout, StoreError};
use fs2::FileExt;
use log::debug;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// How often a contended lock file is retried.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// An in-process mutex paired with an exclusive lock on a file in the data dir.
/// Threads queue on the mutex; other processes are kept out by the file lock.
pub struct StoreLock {
    resource: &'static str,
    path: PathBuf,
    mutex: Mutex<()>,
    timeout: Duration,
}

/// Both halves of a held [`StoreLock`]. Dropping it closes the file, which releases the lock.
pub struct StoreLockGuard<'a> {
    _file: File,
    _held: MutexGuard<'a, ()>,
}

impl StoreLock {
    pub fn new(resource: &'static str, path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            resource,
            path: path.into(),
            mutex: Mutex::new(()),
            timeout,
        }
    }

    /// Wait up to the configured timeout for both the mutex and the lock file.
    ///
    /// # Errors
    /// Returns `LockTimeout` if either stays busy past the deadline, or an io error if
    /// the lock file cannot be opened.
    pub fn acquire(&self) -> Result<StoreLockGuard<'_>, Error> {
        let deadline = Instant::now() + self.timeout;
        let held = self
            .mutex
            .try_lock_until(deadline)
            .ok_or_else(|| self.timed_out())?;
        let file = self.open_file()?;
        let contended = fs2::lock_contended_error().kind();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == contended => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.timed_out().into());
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(StoreError::io(&self.path, e).into()),
            }
        }
        debug!("Acquired {} lock", self.resource);
        Ok(StoreLockGuard {
            _file: file,
            _held: held,
        })
    }

    fn open_file(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))
    }

    fn timed_out(&self) -> LockTimeout {
        LockTimeout {
            resource: self.resource,
            waited: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_lock(dir: &TempDir) -> StoreLock {
        StoreLock::new("test", dir.path().join("LOCK"), Duration::from_millis(30))
    }

    #[test_log::test]
    fn test_second_handle_waits_for_file_lock() {
        let dir = TempDir::new().unwrap();
        let first = test_lock(&dir);
        let second = test_lock(&dir);

        let held = first.acquire().unwrap();
        let err = second.acquire().err().unwrap();
        assert!(matches!(err, Error::LockTimeout(LockTimeout { resource: "test", .. })));

        drop(held);
        assert!(second.acquire().is_ok());
    }

    #[test_log::test]
    fn test_same_handle_times_out_on_mutex() {
        let dir = TempDir::new().unwrap();
        let lock = test_lock(&dir);
        let _held = lock.acquire().unwrap();
        assert!(lock.acquire().err().unwrap().is_retryable());
    }

    #[test_log::test]
    fn test_creates_missing_data_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new").join("LOCK");
        let lock = StoreLock::new("test", &path, Duration::ZERO);
        let _held = lock.acquire().unwrap();
        assert!(path.exists());
    }
}
