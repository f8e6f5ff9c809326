//! The shared leaderboard resource: both input channels, the merged table and its scalars,
//! behind one lock so uploads and manual entries never interleave their merges.
//! The lock is also a file in the data dir, so the API and the admin CLI exclude each other.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lock::{StoreLock, StoreLockGuard};
use crate::manual_ledger::ManualLedger;
use crate::merge::{MergeEngine, MergedTable};
use crate::scalar_state::{ScalarStateStore, ScalarWriter};
use crate::submission_set::SubmissionSet;
use crate::table::{AverageColumn, CsvTable};
use crate::{Entry, ManualEntry};
use serde::Serialize;
use std::fs;

/// What a write did to the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Rows accepted from the caller
    pub rows_received: usize,
    /// Whether the merge ran; it is skipped until manual data exists
    pub merged: bool,
    pub participants: usize,
    pub total_steps: i64,
}

pub struct Leaderboard {
    submissions: SubmissionSet,
    ledger: ManualLedger,
    table: CsvTable,
    scalars: ScalarStateStore,
    lock: StoreLock,
}

/// Everything a write holds: the leaderboard lock, then the scalar lock.
struct WriteAccess<'a> {
    _board: StoreLockGuard<'a>,
    scalars: ScalarWriter<'a>,
}

impl Leaderboard {
    /// Open the stores under the configured data directory, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).map_err(|e| StoreError::io(&config.data_dir, e))?;
        Ok(Self {
            submissions: SubmissionSet::from_config(config),
            ledger: ManualLedger::from_config(config),
            table: CsvTable::new(config.leaderboard_path(), AverageColumn::Required),
            scalars: ScalarStateStore::from_config(config),
            lock: StoreLock::new("leaderboard", config.lock_path(), config.lock_timeout()),
        })
    }

    pub fn scalars(&self) -> &ScalarStateStore {
        &self.scalars
    }

    /// Replace the submission set with an uploaded table, then merge.
    ///
    /// # Errors
    /// Returns a validation error with nothing changed if the upload is malformed.
    /// A merge failure after a successful replace is returned as well; the replace stays.
    pub fn upload_submission(&self, text: &str) -> Result<MergeReport> {
        let access = self.acquire()?;
        let rows_received = self.submissions.replace_from_csv(text)?;
        self.merge_locked(&access, rows_received)
    }

    /// Replace the submission set with already parsed entries, then merge.
    ///
    /// # Errors
    /// See [`Leaderboard::upload_submission`].
    pub fn replace_submission(&self, entries: Vec<Entry>) -> Result<MergeReport> {
        let access = self.acquire()?;
        let rows_received = self.submissions.replace(entries)?;
        self.merge_locked(&access, rows_received)
    }

    /// Append a manual entry blob to the ledger, then merge.
    ///
    /// # Errors
    /// Returns a validation error with nothing changed if the blob is malformed.
    /// A merge failure after a successful append is returned as well; the append stays.
    pub fn append_manual_csv(&self, text: &str) -> Result<MergeReport> {
        let access = self.acquire()?;
        let rows_received = self.ledger.append_from_csv(text)?;
        self.merge_locked(&access, rows_received)
    }

    /// Append manual records to the ledger, then merge.
    ///
    /// # Errors
    /// See [`Leaderboard::append_manual_csv`].
    pub fn append_manual(&self, records: Vec<ManualEntry>) -> Result<MergeReport> {
        let access = self.acquire()?;
        let rows_received = self.ledger.append(records)?;
        self.merge_locked(&access, rows_received)
    }

    /// Rerun the merge with no new input, e.g. to reconcile after a failed total write.
    ///
    /// # Errors
    /// Returns an error if the lock wait times out or the merge fails.
    pub fn merge(&self) -> Result<Option<MergedTable>> {
        let access = self.acquire()?;
        let merged = self.engine(&access).run()?;
        Ok(merged)
    }

    /// The persisted leaderboard, or `None` before the first merge.
    ///
    /// # Errors
    /// Returns an error if the table exists but cannot be read.
    pub fn table(&self) -> Result<Option<Vec<Entry>>> {
        Ok(self.table.load()?)
    }

    /// The persisted leaderboard file as written, for downloads.
    ///
    /// # Errors
    /// Returns an error if the table exists but cannot be read.
    pub fn table_csv(&self) -> Result<Option<String>> {
        Ok(self.table.read_raw()?)
    }

    /// The aggregate as of the last completed merge.
    pub fn total_steps(&self) -> i64 {
        self.scalars.total_steps()
    }

    fn merge_locked(&self, access: &WriteAccess<'_>, rows_received: usize) -> Result<MergeReport> {
        let report = match self.engine(access).run()? {
            Some(merged) => MergeReport {
                rows_received,
                merged: true,
                participants: merged.len(),
                total_steps: merged.total_steps(),
            },
            None => MergeReport {
                rows_received,
                merged: false,
                participants: 0,
                total_steps: self.scalars.total_steps(),
            },
        };
        Ok(report)
    }

    fn engine<'a>(&'a self, access: &'a WriteAccess<'a>) -> MergeEngine<'a> {
        MergeEngine {
            submissions: &self.submissions,
            ledger: &self.ledger,
            table: &self.table,
            scalars: &access.scalars,
        }
    }

    /// Take every lock a write needs before anything is mutated, so a timeout leaves
    /// nothing half done.
    fn acquire(&self) -> Result<WriteAccess<'_>> {
        let board = self.lock.acquire()?;
        let scalars = self.scalars.writer()?;
        Ok(WriteAccess {
            _board: board,
            scalars,
        })
    }
}
