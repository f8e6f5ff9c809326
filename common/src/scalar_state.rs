//! Named progress values kept in one JSON record next to the leaderboard.

use crate::config::StoreConfig;
use crate::error::{Error, StoreError, ValidationError};
use crate::fs_util::{read_optional, write_atomic};
use crate::lock::{StoreLock, StoreLockGuard};
use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest integer an f64 holds exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Each scalar the store tracks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKey {
    AggregateTotalSteps,
    StepGoal,
    Goal,
    CurrentValue,
}

impl ScalarKey {
    pub const ALL: [ScalarKey; 4] = [
        ScalarKey::AggregateTotalSteps,
        ScalarKey::StepGoal,
        ScalarKey::Goal,
        ScalarKey::CurrentValue,
    ];

    /// The key this value is stored under in the JSON record.
    /// The aggregate keeps the `current_steps` name existing deployments already wrote.
    pub fn field_name(self) -> &'static str {
        match self {
            ScalarKey::AggregateTotalSteps => "current_steps",
            ScalarKey::StepGoal => "step_goal",
            ScalarKey::Goal => "goal",
            ScalarKey::CurrentValue => "current_value",
        }
    }

    pub fn default_value(self) -> f64 {
        match self {
            ScalarKey::AggregateTotalSteps | ScalarKey::CurrentValue => 0.0,
            ScalarKey::StepGoal => 10_000.0,
            ScalarKey::Goal => 1_000.0,
        }
    }

    /// Derived values are only written by a merge.
    pub fn is_derived(self) -> bool {
        self == ScalarKey::AggregateTotalSteps
    }
}

impl fmt::Display for ScalarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKey::AggregateTotalSteps => "aggregate_total_steps",
            ScalarKey::StepGoal => "step_goal",
            ScalarKey::Goal => "goal",
            ScalarKey::CurrentValue => "current_value",
        };
        f.write_str(name)
    }
}

/// Every scalar at once, defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarSnapshot {
    #[serde(rename = "current_steps")]
    pub aggregate_total_steps: i64,
    pub step_goal: f64,
    pub goal: f64,
    pub current_value: f64,
}

pub struct ScalarStateStore {
    path: PathBuf,
    lock: StoreLock,
}

/// Exclusive write access to the scalar record.
/// Leaderboard writes take it before mutating anything, so recording the total cannot time out.
pub struct ScalarWriter<'a> {
    store: &'a ScalarStateStore,
    _guard: StoreLockGuard<'a>,
}

impl ScalarWriter<'_> {
    /// Record the aggregate produced by a merge.
    pub(crate) fn record_total_steps(&self, total: i64) -> Result<(), StoreError> {
        self.store
            .write_value(ScalarKey::AggregateTotalSteps, Value::from(total))
    }
}

impl ScalarStateStore {
    /// The lock file sits next to the record, e.g. `steps.lock` for `steps.json`.
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let path = path.into();
        let lock = StoreLock::new("scalar state", path.with_extension("lock"), lock_timeout);
        Self { path, lock }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.scalar_path(), config.lock_timeout())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one value. Never fails: missing keys and unreadable storage yield the default.
    pub fn get(&self, key: ScalarKey) -> f64 {
        match self.read_record() {
            Ok(record) => value_of(&record, key),
            Err(e) => {
                warn!("Falling back to default {key}: {e}");
                key.default_value()
            }
        }
    }

    /// The aggregate as of the last completed merge.
    pub fn total_steps(&self) -> i64 {
        #[allow(clippy::cast_possible_truncation)]
        let total = self.get(ScalarKey::AggregateTotalSteps).round() as i64;
        total
    }

    pub fn snapshot(&self) -> ScalarSnapshot {
        let record = self.read_record().unwrap_or_else(|e| {
            warn!("Falling back to default scalars: {e}");
            Map::new()
        });
        #[allow(clippy::cast_possible_truncation)]
        let aggregate_total_steps = value_of(&record, ScalarKey::AggregateTotalSteps).round() as i64;
        ScalarSnapshot {
            aggregate_total_steps,
            step_goal: value_of(&record, ScalarKey::StepGoal),
            goal: value_of(&record, ScalarKey::Goal),
            current_value: value_of(&record, ScalarKey::CurrentValue),
        }
    }

    /// Set one directly editable value, keeping every other key as last written.
    ///
    /// # Errors
    /// Returns an error if the key is derived, the value is not finite, the lock wait
    /// times out, or the record cannot be read back or written.
    pub fn set(&self, key: ScalarKey, value: f64) -> Result<(), Error> {
        if key.is_derived() {
            return Err(ValidationError::DerivedScalar { key }.into());
        }
        let number = json_number(value).ok_or(ValidationError::NonFiniteScalar { key })?;
        let _guard = self.lock.acquire()?;
        self.write_value(key, number)?;
        info!("Set {key} to {value}");
        Ok(())
    }

    /// Take the scalar lock for a whole leaderboard write.
    ///
    /// # Errors
    /// Returns `LockTimeout` if another writer holds it past the timeout.
    pub fn writer(&self) -> Result<ScalarWriter<'_>, Error> {
        Ok(ScalarWriter {
            store: self,
            _guard: self.lock.acquire()?,
        })
    }

    fn read_record(&self) -> Result<Map<String, Value>, StoreError> {
        let Some(text) = read_optional(&self.path)? else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(record)) => Ok(record),
            Ok(_) => Err(StoreError::corrupt(&self.path, "expected a JSON object")),
            Err(e) => Err(StoreError::corrupt(&self.path, e)),
        }
    }

    /// Read-modify-write of the whole record; unknown keys survive.
    fn write_value(&self, key: ScalarKey, value: Value) -> Result<(), StoreError> {
        let mut record = self.read_record()?;
        record.insert(key.field_name().to_string(), value);
        let bytes = serde_json::to_vec(&Value::Object(record))
            .map_err(|e| StoreError::corrupt(&self.path, e))?;
        write_atomic(&self.path, &bytes)
    }
}

fn value_of(record: &Map<String, Value>, key: ScalarKey) -> f64 {
    let stored = match record.get(key.field_name()) {
        Some(Value::Number(n)) => n.as_f64(),
        // older writers stored whatever the client posted
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    stored
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| key.default_value())
}

/// Whole values are stored as JSON integers so the file stays readable.
fn json_number(value: f64) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER {
        #[allow(clippy::cast_possible_truncation)]
        return Some(Value::from(value as i64));
    }
    Number::from_f64(value).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> ScalarStateStore {
        ScalarStateStore::new(dir.path().join("steps.json"), Duration::from_millis(50))
    }

    #[test_log::test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        assert_eq!(store.get(ScalarKey::AggregateTotalSteps), 0.0);
        assert_eq!(store.get(ScalarKey::StepGoal), 10_000.0);
        assert_eq!(store.get(ScalarKey::Goal), 1_000.0);
        assert_eq!(store.get(ScalarKey::CurrentValue), 0.0);
    }

    #[test_log::test]
    fn test_set_goal_keeps_step_goal() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.set(ScalarKey::StepGoal, 25_000.0).unwrap();
        store.set(ScalarKey::Goal, 2_500.0).unwrap();
        assert_eq!(store.get(ScalarKey::Goal), 2_500.0);
        assert_eq!(store.get(ScalarKey::StepGoal), 25_000.0);
    }

    #[test_log::test]
    fn test_set_preserves_unknown_keys_and_total() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        std::fs::write(store.path(), r#"{"current_steps": 350, "note": "keep me"}"#).unwrap();

        store.set(ScalarKey::CurrentValue, 12.5).unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["note"], "keep me");
        assert_eq!(raw["current_steps"], 350);
        assert_eq!(raw["current_value"], 12.5);
        assert_eq!(store.total_steps(), 350);
    }

    #[test_log::test]
    fn test_whole_values_stored_as_integers() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.set(ScalarKey::Goal, 2_500.0).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"goal":2500}"#);
    }

    #[test_log::test]
    fn test_rejects_derived_and_non_finite() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        assert!(matches!(
            store.set(ScalarKey::AggregateTotalSteps, 5.0),
            Err(Error::Validation(ValidationError::DerivedScalar { .. }))
        ));
        assert!(matches!(
            store.set(ScalarKey::Goal, f64::NAN),
            Err(Error::Validation(ValidationError::NonFiniteScalar { .. }))
        ));
        assert!(!store.path().exists());
    }

    #[test_log::test]
    fn test_corrupt_record_reads_defaults_but_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        std::fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.get(ScalarKey::Goal), 1_000.0);
        assert!(matches!(
            store.set(ScalarKey::Goal, 5.0),
            Err(Error::Store(StoreError::Corrupt { .. }))
        ));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[test_log::test]
    fn test_string_values_from_older_writers() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        std::fs::write(store.path(), r#"{"goal": "4000", "step_goal": "lots"}"#).unwrap();
        assert_eq!(store.get(ScalarKey::Goal), 4_000.0);
        assert_eq!(store.get(ScalarKey::StepGoal), 10_000.0);
    }

    #[test_log::test]
    fn test_set_times_out_while_locked() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let _held = store.writer().unwrap();
        let err = store.set(ScalarKey::Goal, 5.0).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test_log::test]
    fn test_writer_excludes_other_handles_on_same_file() {
        let dir = TempDir::new().unwrap();
        let merging = test_store(&dir);
        let admin = test_store(&dir);
        merging.set(ScalarKey::StepGoal, 25_000.0).unwrap();

        let writer = merging.writer().unwrap();
        assert!(matches!(
            admin.set(ScalarKey::Goal, 2_500.0),
            Err(Error::LockTimeout(_))
        ));
        writer.record_total_steps(350).unwrap();
        drop(writer);

        admin.set(ScalarKey::Goal, 2_500.0).unwrap();
        let snapshot = merging.snapshot();
        assert_eq!(snapshot.aggregate_total_steps, 350);
        assert_eq!(snapshot.step_goal, 25_000.0);
        assert_eq!(snapshot.goal, 2_500.0);
    }

    #[test_log::test]
    fn test_snapshot_serializes_with_endpoint_names() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.writer().unwrap().record_total_steps(42).unwrap();
        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(json["current_steps"], 42);
        assert_eq!(json["step_goal"], 10_000.0);
    }
}
