//! Reading and writing the delimited tables: uploads, manual blobs and the persisted CSV files.

use crate::error::{StoreError, ValidationError};
use crate::fs_util::{read_optional, write_atomic};
use crate::{
    AVG_DAILY_STEPS_COLUMN, Entry, MANUAL_AVERAGE_COLUMN, MANUAL_NAME_COLUMN,
    MANUAL_STEPS_COLUMN, ManualEntry, NAME_COLUMN, TOTAL_STEPS_COLUMN,
};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use std::path::{Path, PathBuf};

/// Whether a table must carry the average column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageColumn {
    Required,
    Optional,
}

/// The column names a table is read with.
struct Layout {
    name: &'static str,
    steps: &'static str,
    average: &'static str,
    average_column: AverageColumn,
}

const CANONICAL: Layout = Layout {
    name: NAME_COLUMN,
    steps: TOTAL_STEPS_COLUMN,
    average: AVG_DAILY_STEPS_COLUMN,
    average_column: AverageColumn::Required,
};

const MANUAL: Layout = Layout {
    name: MANUAL_NAME_COLUMN,
    steps: MANUAL_STEPS_COLUMN,
    average: MANUAL_AVERAGE_COLUMN,
    average_column: AverageColumn::Optional,
};

struct RawRow {
    name: String,
    steps: i64,
    average: Option<f64>,
}

/// Parse a bulk upload. Extra columns are dropped; all three canonical columns are required.
///
/// # Errors
/// Returns an error if a column or value is missing or a value is not numeric.
pub fn parse_submission(text: &str) -> Result<Vec<Entry>, ValidationError> {
    parse_entries(text, AverageColumn::Required)
}

/// Parse a manual entry blob with a `name,steps[,averageSteps]` header.
///
/// # Errors
/// Returns an error if `name` or `steps` is missing or a value is not numeric.
pub fn parse_manual(text: &str) -> Result<Vec<ManualEntry>, ValidationError> {
    Ok(parse_rows(text, &MANUAL)?
        .into_iter()
        .map(|r| ManualEntry {
            name: r.name,
            steps: r.steps,
            average_steps: r.average,
        })
        .collect())
}

fn parse_entries(text: &str, average_column: AverageColumn) -> Result<Vec<Entry>, ValidationError> {
    let layout = Layout {
        average_column,
        ..CANONICAL
    };
    Ok(parse_rows(text, &layout)?
        .into_iter()
        .map(|r| Entry {
            name: r.name,
            total_steps: r.steps,
            avg_daily_steps: r.average.unwrap_or(0.0),
        })
        .collect())
}

fn parse_rows(text: &str, layout: &Layout) -> Result<Vec<RawRow>, ValidationError> {
    let text = text.trim_start_matches('\u{feff}');
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(malformed)?.clone();

    let name_idx = column_index(&headers, layout.name)?;
    let steps_idx = column_index(&headers, layout.steps)?;
    let average_idx = match layout.average_column {
        AverageColumn::Required => Some(column_index(&headers, layout.average)?),
        AverageColumn::Optional => headers.iter().position(|h| h == layout.average),
    };

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let row = i + 1;
        let record = record.map_err(malformed)?;

        let name = match record.get(name_idx) {
            Some("") => return Err(ValidationError::EmptyName { row }),
            Some(name) => name.to_string(),
            None => {
                return Err(ValidationError::MissingValue {
                    row,
                    column: layout.name,
                });
            }
        };
        let steps = match non_empty(&record, steps_idx) {
            Some(raw) => parse_steps(raw, row, layout.steps)?,
            None => {
                return Err(ValidationError::MissingValue {
                    row,
                    column: layout.steps,
                });
            }
        };
        let average = match average_idx.and_then(|idx| non_empty(&record, idx)) {
            Some(raw) => Some(parse_average(raw, row, layout.average)?),
            None if layout.average_column == AverageColumn::Required => {
                return Err(ValidationError::MissingValue {
                    row,
                    column: layout.average,
                });
            }
            None => None,
        };

        rows.push(RawRow {
            name,
            steps,
            average,
        });
    }
    Ok(rows)
}

fn column_index(headers: &StringRecord, column: &'static str) -> Result<usize, ValidationError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or(ValidationError::MissingColumn { column })
}

fn non_empty(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).filter(|v| !v.is_empty())
}

fn malformed(e: csv::Error) -> ValidationError {
    ValidationError::Malformed(e.to_string())
}

/// Step counts are integers, but spreadsheets like to export them as `1200.0`.
fn parse_steps(raw: &str, row: usize, column: &'static str) -> Result<i64, ValidationError> {
    if let Ok(steps) = raw.parse::<i64>() {
        return Ok(steps);
    }
    match raw.parse::<f64>() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(ValidationError::InvalidValue {
            row,
            column,
            value: raw.to_string(),
        }),
    }
}

fn parse_average(raw: &str, row: usize, column: &'static str) -> Result<f64, ValidationError> {
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(f),
        _ => Err(ValidationError::InvalidValue {
            row,
            column,
            value: raw.to_string(),
        }),
    }
}

/// Encode entries with the canonical header, which is written even when there are no rows.
///
/// # Errors
/// Returns an error if a row cannot be serialized.
pub fn encode_entries(entries: &[Entry]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record([NAME_COLUMN, TOTAL_STEPS_COLUMN, AVG_DAILY_STEPS_COLUMN])?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// A CSV file of entries with the canonical header.
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
    average_column: AverageColumn,
}

impl CsvTable {
    pub fn new(path: impl Into<PathBuf>, average_column: AverageColumn) -> Self {
        Self {
            path: path.into(),
            average_column,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every row, or `None` if the file has never been written.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(&self) -> Result<Option<Vec<Entry>>, StoreError> {
        match self.read_raw()? {
            Some(text) => parse_entries(&text, self.average_column)
                .map(Some)
                .map_err(|e| StoreError::corrupt(&self.path, e)),
            None => Ok(None),
        }
    }

    /// The file contents as written, for serving downloads.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub fn read_raw(&self) -> Result<Option<String>, StoreError> {
        read_optional(&self.path)
    }

    /// Replace the whole file with these rows.
    ///
    /// # Errors
    /// Returns an error if the rows cannot be encoded or the file cannot be written.
    pub fn store(&self, entries: &[Entry]) -> Result<(), StoreError> {
        let bytes = encode_entries(entries).map_err(|e| StoreError::corrupt(&self.path, e))?;
        write_atomic(&self.path, &bytes)
    }
}
