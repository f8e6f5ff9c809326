//! Every manually entered record, kept without deduplication.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::table::{AverageColumn, CsvTable, parse_manual};
use crate::{Entry, ManualEntry, sort_by_steps_desc};
use log::info;

pub struct ManualLedger {
    table: CsvTable,
}

impl ManualLedger {
    pub fn new(table: CsvTable) -> Self {
        Self { table }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        // ledgers written before averages were recorded have no average column
        Self::new(CsvTable::new(config.manual_path(), AverageColumn::Optional))
    }

    /// Load every row ever appended. `None` means no manual entry has been received.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read or parsed.
    pub fn load(&self) -> std::result::Result<Option<Vec<Entry>>, StoreError> {
        self.table.load()
    }

    /// Append the records as new rows, then rewrite the ledger highest steps first.
    /// Rows with a name already in the ledger are kept as separate rows.
    ///
    /// # Errors
    /// Returns an error if a record is invalid or the ledger cannot be read or written.
    pub fn append(&self, records: Vec<ManualEntry>) -> Result<usize> {
        let new_rows: Vec<Entry> = records.into_iter().map(Entry::from).collect();
        for (i, entry) in new_rows.iter().enumerate() {
            entry.validate(i + 1)?;
        }

        let appended = new_rows.len();
        let mut ledger = self.load()?.unwrap_or_default();
        ledger.extend(new_rows);
        sort_by_steps_desc(&mut ledger);
        self.table.store(&ledger)?;

        info!(
            "Appended {appended} manual rows, ledger now holds {}",
            ledger.len()
        );
        Ok(appended)
    }

    /// Parse a manual entry blob and append its records.
    ///
    /// # Errors
    /// Returns an error if the blob lacks `name` or `steps`, or the ledger write fails.
    pub fn append_from_csv(&self, text: &str) -> Result<usize> {
        let records = parse_manual(text)?;
        self.append(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ValidationError};
    use tempfile::TempDir;

    fn test_ledger(dir: &TempDir) -> ManualLedger {
        ManualLedger::from_config(&StoreConfig::new(dir.path()))
    }

    #[test_log::test]
    fn test_first_append_creates_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = test_ledger(&dir);
        assert_eq!(ledger.load().unwrap(), None);

        ledger.append_from_csv("name,steps\nAda,50\n").unwrap();

        assert_eq!(ledger.load().unwrap(), Some(vec![Entry::new("Ada", 50, 0.0)]));
    }

    #[test_log::test]
    fn test_append_keeps_duplicates_and_sorts() {
        let dir = TempDir::new().unwrap();
        let ledger = test_ledger(&dir);
        ledger
            .append_from_csv("name,steps,averageSteps\nAda,50,5\n")
            .unwrap();
        ledger
            .append_from_csv("name,steps,averageSteps\nGrace,70,7\nAda,60,6\n")
            .unwrap();

        assert_eq!(
            ledger.load().unwrap(),
            Some(vec![
                Entry::new("Grace", 70, 7.0),
                Entry::new("Ada", 60, 6.0),
                Entry::new("Ada", 50, 5.0),
            ])
        );
    }

    #[test_log::test]
    fn test_invalid_blob_leaves_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = test_ledger(&dir);
        ledger.append_from_csv("name,steps\nAda,50\n").unwrap();

        let result = ledger.append_from_csv("name,averageSteps\nGrace,7\n");

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingColumn { .. }))
        ));
        assert_eq!(ledger.load().unwrap().unwrap().len(), 1);
    }

    #[test_log::test]
    fn test_negative_steps_are_stored() {
        let dir = TempDir::new().unwrap();
        let ledger = test_ledger(&dir);
        ledger.append_from_csv("name,steps\nAda,-10\n").unwrap();
        assert_eq!(ledger.load().unwrap().unwrap()[0].total_steps, -10);
    }
}
