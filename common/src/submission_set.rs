//! The most recent bulk upload, replaced wholesale each time.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::table::{AverageColumn, CsvTable, parse_submission};
use crate::{Entry, sort_by_steps_desc};
use log::info;

pub struct SubmissionSet {
    table: CsvTable,
}

impl SubmissionSet {
    pub fn new(table: CsvTable) -> Self {
        Self { table }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(CsvTable::new(
            config.submission_path(),
            AverageColumn::Required,
        ))
    }

    /// Load the current set. `None` means nothing has been uploaded yet.
    ///
    /// # Errors
    /// Returns an error if the stored upload cannot be read or parsed.
    pub fn load(&self) -> std::result::Result<Option<Vec<Entry>>, StoreError> {
        self.table.load()
    }

    /// Check every row, then swap the stored set for these entries, highest steps first.
    /// On a validation failure the previous set is left as it was.
    ///
    /// # Errors
    /// Returns an error if a row is invalid or the file cannot be written.
    pub fn replace(&self, mut entries: Vec<Entry>) -> Result<usize> {
        for (i, entry) in entries.iter().enumerate() {
            entry.validate(i + 1)?;
        }
        sort_by_steps_desc(&mut entries);
        self.table.store(&entries)?;
        info!("Replaced submission set with {} rows", entries.len());
        Ok(entries.len())
    }

    /// Parse an uploaded table and replace the stored set with it.
    ///
    /// # Errors
    /// Returns an error if the upload lacks a required column or value, or the write fails.
    pub fn replace_from_csv(&self, text: &str) -> Result<usize> {
        let entries = parse_submission(text)?;
        self.replace(entries)
    }
}
