//! Error kinds surfaced by the leaderboard core.

use crate::scalar_state::ScalarKey;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Malformed or incomplete input. Nothing is mutated when this is returned.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required column `{column}`")]
    MissingColumn { column: &'static str },
    #[error("row {row}: missing value for `{column}`")]
    MissingValue { row: usize, column: &'static str },
    #[error("row {row}: invalid value {value:?} for `{column}`")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("row {row}: participant name is empty")]
    EmptyName { row: usize },
    #[error("malformed delimited text: {0}")]
    Malformed(String),
    #[error("{key} must be a finite number")]
    NonFiniteScalar { key: ScalarKey },
    #[error("{key} is derived from the leaderboard and cannot be set directly")]
    DerivedScalar { key: ScalarKey },
}

/// A persisted resource could not be read or written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt data in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A bounded lock wait expired. Callers may retry.
#[derive(Debug, Error)]
#[error("timed out after {waited:?} waiting for the {resource} lock")]
pub struct LockTimeout {
    pub resource: &'static str,
    pub waited: Duration,
}

/// Failures while recomputing the leaderboard.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("manual entries exist but submission data is unreadable: {0}")]
    MissingSubmissionData(#[source] StoreError),
    #[error("manual ledger is unreadable: {0}")]
    ManualLedger(#[source] StoreError),
    #[error("failed to persist merge result: {0}")]
    Persist(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
}

impl Error {
    /// Whether the call can simply be repeated. Only lock waits qualify: every lock a
    /// write needs is taken before anything is mutated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout(_))
    }
}
