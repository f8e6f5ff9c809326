//! A library with the merge engine and persisted state behind the step-count leaderboard.

pub mod config;
pub mod error;
pub mod leaderboard;
pub mod manual_ledger;
pub mod merge;
pub mod scalar_state;
pub mod submission_set;
pub mod table;

mod fs_util;
mod lock;

pub use config::StoreConfig;
pub use error::{Error, LockTimeout, MergeError, Result, StoreError, ValidationError};
pub use leaderboard::{Leaderboard, MergeReport};
pub use merge::MergedTable;
pub use scalar_state::{ScalarKey, ScalarSnapshot, ScalarStateStore};

use serde::{Deserialize, Serialize};

/// File holding the most recent bulk upload.
pub const SUBMISSION_FILE: &str = "submit.csv";
/// File holding every manual entry ever received.
pub const MANUAL_FILE: &str = "manual.csv";
/// File holding the merged leaderboard served for download.
pub const LEADERBOARD_FILE: &str = "main.csv";
/// File holding the scalar progress values.
pub const SCALAR_FILE: &str = "steps.json";
/// Lock file held by whichever process is writing the leaderboard.
pub const LOCK_FILE: &str = "LOCK";

pub const NAME_COLUMN: &str = "Name";
pub const TOTAL_STEPS_COLUMN: &str = "Total Steps";
pub const AVG_DAILY_STEPS_COLUMN: &str = "Avg Daily Steps";

pub const MANUAL_NAME_COLUMN: &str = "name";
pub const MANUAL_STEPS_COLUMN: &str = "steps";
pub const MANUAL_AVERAGE_COLUMN: &str = "averageSteps";

pub const DEFAULT_DATA_DIR: &str = "public";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// One participant's aggregated step metrics.
/// Serialized with the column names used by uploads and the leaderboard file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Total Steps")]
    pub total_steps: i64,
    #[serde(rename = "Avg Daily Steps")]
    pub avg_daily_steps: f64,
}

impl Entry {
    pub fn new(name: impl Into<String>, total_steps: i64, avg_daily_steps: f64) -> Self {
        Self {
            name: name.into(),
            total_steps,
            avg_daily_steps,
        }
    }

    /// Check the invariants every stored row must hold.
    /// `row` is the 1-based data row used in error messages.
    ///
    /// # Errors
    /// Returns an error if the name is blank or the average is not a finite number.
    pub fn validate(&self, row: usize) -> std::result::Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName { row });
        }
        if !self.avg_daily_steps.is_finite() {
            return Err(ValidationError::InvalidValue {
                row,
                column: AVG_DAILY_STEPS_COLUMN,
                value: self.avg_daily_steps.to_string(),
            });
        }
        Ok(())
    }
}

/// A manually entered record before it is renamed into the `Entry` shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManualEntry {
    pub name: String,
    pub steps: i64,
    #[serde(rename = "averageSteps", default)]
    pub average_steps: Option<f64>,
}

impl From<ManualEntry> for Entry {
    fn from(m: ManualEntry) -> Self {
        Entry {
            name: m.name,
            total_steps: m.steps,
            avg_daily_steps: m.average_steps.unwrap_or(0.0),
        }
    }
}

/// Stable sort, highest step count first.
pub(crate) fn sort_by_steps_desc(entries: &mut [Entry]) {
    entries.sort_by(|a, b| b.total_steps.cmp(&a.total_steps));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_manual_entry_renames_fields() {
        let manual = ManualEntry {
            name: "Ada".to_string(),
            steps: 1200,
            average_steps: Some(40.5),
        };
        assert_eq!(Entry::from(manual), Entry::new("Ada", 1200, 40.5));
    }

    #[test_log::test]
    fn test_manual_entry_average_defaults_to_zero() {
        let manual = ManualEntry {
            name: "Ada".to_string(),
            steps: 1200,
            average_steps: None,
        };
        assert_eq!(Entry::from(manual).avg_daily_steps, 0.0);
    }

    #[test_log::test]
    fn test_validate_rejects_blank_name() {
        let entry = Entry::new("  ", 10, 1.0);
        assert!(matches!(
            entry.validate(3),
            Err(ValidationError::EmptyName { row: 3 })
        ));
    }

    #[test_log::test]
    fn test_sort_is_stable_for_ties() {
        let mut entries = vec![
            Entry::new("a", 5, 0.0),
            Entry::new("b", 9, 0.0),
            Entry::new("c", 5, 0.0),
        ];
        sort_by_steps_desc(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
