//! Where the persisted state lives and how long writers wait for each other.

use crate::{
    DEFAULT_DATA_DIR, DEFAULT_LOCK_TIMEOUT_MS, LEADERBOARD_FILE, LOCK_FILE, MANUAL_FILE,
    SCALAR_FILE, SUBMISSION_FILE,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the CSV tables and the scalar record
    pub data_dir: PathBuf,
    /// Maximum time to wait for a lock before giving up
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn submission_path(&self) -> PathBuf {
        self.data_dir.join(SUBMISSION_FILE)
    }

    pub fn manual_path(&self) -> PathBuf {
        self.data_dir.join(MANUAL_FILE)
    }

    pub fn leaderboard_path(&self) -> PathBuf {
        self.data_dir.join(LEADERBOARD_FILE)
    }

    pub fn scalar_path(&self) -> PathBuf {
        self.data_dir.join(SCALAR_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }
}
