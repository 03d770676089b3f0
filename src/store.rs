//! Record store access
//!
//! The engine never owns persistence. It reads observations through the
//! [`RecordStore`] trait; [`InMemoryStore`] is the bundled implementation used by
//! the CLI, the C ABI and the tests.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ComputeError;
use crate::types::{CatalogEntry, ColumnKey, Observation};

/// Read-only view of the persistent record store
pub trait RecordStore {
    /// All known `(source, metric_name)` pairs with their unit and observation count
    fn catalog(&self) -> Result<Vec<CatalogEntry>, ComputeError>;

    /// Observations for one metric, ascending by date, bounds inclusive
    fn query(
        &self,
        metric_name: &str,
        source: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Observation>, ComputeError>;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn catalog(&self) -> Result<Vec<CatalogEntry>, ComputeError> {
        (**self).catalog()
    }

    fn query(
        &self,
        metric_name: &str,
        source: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Observation>, ComputeError> {
        (**self).query(metric_name, source, start, end)
    }
}

/// Flat observation record, the wire format for loading a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub source: String,
    pub metric_name: String,
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

/// Whether `date` falls inside the optional inclusive bounds
pub fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
}

/// In-memory record store keyed by `(source, metric_name)`.
///
/// Holds at most one observation per date and metric; a later insert for the
/// same day replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    series: BTreeMap<ColumnKey, BTreeMap<NaiveDate, Observation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation. A repeated `(source, metric, date)` keeps the first value.
    pub fn insert(&mut self, key: ColumnKey, observation: Observation) {
        let observations = self.series.entry(key).or_default();
        if observations.contains_key(&observation.date) {
            debug!(date = %observation.date, "dropping duplicate observation");
            return;
        }
        observations.insert(observation.date, observation);
    }

    /// Insert a run of `(date, value)` pairs sharing one unit
    pub fn insert_series(&mut self, key: &ColumnKey, unit: &str, values: &[(NaiveDate, f64)]) {
        for &(date, value) in values {
            self.insert(key.clone(), Observation::new(date, value, unit));
        }
    }

    pub fn from_records(records: impl IntoIterator<Item = ObservationRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            let key = ColumnKey::new(record.source, record.metric_name);
            store.insert(key, Observation::new(record.date, record.value, record.unit));
        }
        store
    }

    /// Parse a JSON array of [`ObservationRecord`]s
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let records: Vec<ObservationRecord> = serde_json::from_str(json)?;
        Ok(Self::from_records(records))
    }

    /// Parse NDJSON, one [`ObservationRecord`] per line
    pub fn from_ndjson(ndjson: &str) -> Result<Self, ComputeError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ObservationRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Err(ComputeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(Self::from_records(records))
    }

    /// Parse either a JSON array or NDJSON, chosen by the first non-blank character
    pub fn from_text(text: &str) -> Result<Self, ComputeError> {
        if text.trim_start().starts_with('[') {
            Self::from_json(text)
        } else {
            Self::from_ndjson(text)
        }
    }

    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for InMemoryStore {
    fn catalog(&self) -> Result<Vec<CatalogEntry>, ComputeError> {
        Ok(self
            .series
            .iter()
            .filter(|(_, observations)| !observations.is_empty())
            .map(|(key, observations)| CatalogEntry {
                metric_name: key.metric_name.clone(),
                source: key.source.clone(),
                unit: observations
                    .values()
                    .next()
                    .map(|o| o.unit.clone())
                    .unwrap_or_default(),
                observation_count: observations.len(),
            })
            .collect())
    }

    fn query(
        &self,
        metric_name: &str,
        source: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Observation>, ComputeError> {
        let key = ColumnKey::new(source, metric_name);
        Ok(self
            .series
            .get(&key)
            .map(|observations| {
                observations
                    .values()
                    .filter(|o| in_range(o.date, start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
