//! Combine the submission set and the manual ledger into one ranked leaderboard.

use crate::error::MergeError;
use crate::manual_ledger::ManualLedger;
use crate::scalar_state::ScalarWriter;
use crate::submission_set::SubmissionSet;
use crate::table::CsvTable;
use crate::{Entry, sort_by_steps_desc};
use log::{debug, info};
use std::collections::HashMap;

/// A leaderboard that has been through aggregation.
/// Names are unique, no total is negative, and rows run from most to fewest steps.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    entries: Vec<Entry>,
}

impl MergedTable {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_steps(&self) -> i64 {
        self.entries
            .iter()
            .fold(0i64, |acc, e| acc.saturating_add(e.total_steps))
    }
}

/// Aggregate both channels into a `MergedTable`.
///
/// Rows are grouped by exact name. Both `total_steps` and `avg_daily_steps` are summed
/// within a group. Groups keep the order their name first appeared (submission rows
/// first), which decides ties in the final sort. Negative totals are dropped only after
/// aggregation, so a negative manual correction can still offset a submission.
pub fn merge_entries(submission: &[Entry], manual: &[Entry]) -> MergedTable {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut combined: Vec<Entry> = Vec::new();
    for entry in submission.iter().chain(manual) {
        match index.get(entry.name.as_str()) {
            Some(&i) => {
                let row = &mut combined[i];
                row.total_steps = row.total_steps.saturating_add(entry.total_steps);
                row.avg_daily_steps += entry.avg_daily_steps;
            }
            None => {
                index.insert(entry.name.as_str(), combined.len());
                combined.push(entry.clone());
            }
        }
    }

    sort_by_steps_desc(&mut combined);

    let before = combined.len();
    combined.retain(|e| e.total_steps >= 0);
    if combined.len() < before {
        debug!("Dropped {} participants with negative totals", before - combined.len());
    }

    MergedTable { entries: combined }
}

/// Reads both channels, aggregates them and persists the table with its total.
/// Callers serialize runs with the leaderboard lock; the scalar writer is already held.
pub struct MergeEngine<'a> {
    pub submissions: &'a SubmissionSet,
    pub ledger: &'a ManualLedger,
    pub table: &'a CsvTable,
    pub scalars: &'a ScalarWriter<'a>,
}

impl MergeEngine<'_> {
    /// Recompute the leaderboard.
    ///
    /// Returns `Ok(None)` without touching anything when the manual ledger is absent or
    /// empty: manual data gates the whole pipeline. An absent submission set counts as
    /// empty, but an unreadable one fails the merge before any write.
    ///
    /// The table is written before the total. If the total write fails the table has
    /// already changed; the error is still returned and the next merge reconciles both.
    ///
    /// # Errors
    /// Returns an error if either input cannot be read or either output cannot be written.
    pub fn run(&self) -> Result<Option<MergedTable>, MergeError> {
        let manual = match self.ledger.load().map_err(MergeError::ManualLedger)? {
            Some(rows) if !rows.is_empty() => rows,
            _ => {
                info!("No manual entries yet, leaving the leaderboard as it is");
                return Ok(None);
            }
        };
        let submission = self
            .submissions
            .load()
            .map_err(MergeError::MissingSubmissionData)?
            .unwrap_or_default();

        let merged = merge_entries(&submission, &manual);
        let total = merged.total_steps();

        self.table
            .store(merged.entries())
            .map_err(MergeError::Persist)?;
        self.scalars
            .record_total_steps(total)
            .map_err(MergeError::Persist)?;

        info!(
            "Merged {} submission and {} manual rows into {} participants, {total} steps",
            submission.len(),
            manual.len(),
            merged.len()
        );
        Ok(Some(merged))
    }
}
