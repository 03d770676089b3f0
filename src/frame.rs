//! Wide frame construction
//!
//! Pivots sparse per-metric observations into a dense, date-indexed table with
//! one column per `(source, metric_name)`. Rows are the union of observed dates;
//! a `None` cell means "no observation" and is never conflated with zero.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::ComputeError;
use crate::store::{in_range, RecordStore};
use crate::types::{ColumnKey, Observation};

/// Dense date-indexed table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideFrame {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<ColumnKey, Vec<Option<f64>>>,
}

impl WideFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pivot per-column observations into a frame.
    ///
    /// Columns without observations are left out. Should the same date appear
    /// twice in one column, the first observation is kept.
    pub fn from_columns<I>(columns: I) -> Self
    where
        I: IntoIterator<Item = (ColumnKey, Vec<Observation>)>,
    {
        let columns: Vec<(ColumnKey, Vec<Observation>)> = columns
            .into_iter()
            .filter(|(_, observations)| !observations.is_empty())
            .collect();

        let dates: Vec<NaiveDate> = columns
            .iter()
            .flat_map(|(_, observations)| observations.iter().map(|o| o.date))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut frame = WideFrame {
            dates,
            columns: BTreeMap::new(),
        };

        for (key, observations) in columns {
            let mut cells = vec![None; frame.dates.len()];
            for observation in &observations {
                let row = index[&observation.date];
                if cells[row].is_some() {
                    debug!(
                        column = %key,
                        date = %observation.date,
                        "duplicate observation dropped, keeping first"
                    );
                    continue;
                }
                cells[row] = Some(observation.value);
            }
            // Two store entries may map onto the same key; keep the first column.
            frame.columns.entry(key).or_insert(cells);
        }

        frame
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn row_count(&self) -> usize {
        self.dates.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_keys(&self) -> impl Iterator<Item = &ColumnKey> {
        self.columns.keys()
    }

    pub fn contains(&self, key: &ColumnKey) -> bool {
        self.columns.contains_key(key)
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&[Option<f64>]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    /// Column cells that hold a value, paired with their date
    pub fn observed(&self, key: &ColumnKey) -> Vec<(NaiveDate, f64)> {
        self.column(key)
            .map(|cells| {
                self.dates
                    .iter()
                    .zip(cells)
                    .filter_map(|(date, cell)| cell.map(|v| (*date, v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of missing cells in a column
    pub fn missing_count(&self, key: &ColumnKey) -> Option<usize> {
        self.column(key)
            .map(|cells| cells.iter().filter(|c| c.is_none()).count())
    }

    /// Add or replace a column aligned to the existing rows
    pub fn insert_column(
        &mut self,
        key: ColumnKey,
        cells: Vec<Option<f64>>,
    ) -> Result<Option<Vec<Option<f64>>>, ComputeError> {
        if cells.len() != self.dates.len() {
            return Err(ComputeError::InvalidInput(format!(
                "column {} has {} cells but frame has {} rows",
                key,
                cells.len(),
                self.dates.len()
            )));
        }
        Ok(self.columns.insert(key, cells))
    }

    /// Flat records, one per date: `date` plus one key per column, `null` for missing
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.dates
            .iter()
            .enumerate()
            .map(|(row, date)| {
                let mut record = Map::new();
                record.insert("date".to_string(), Value::String(date.to_string()));
                for (key, cells) in &self.columns {
                    let value = cells[row].map_or(Value::Null, Value::from);
                    record.insert(key.to_string(), value);
                }
                record
            })
            .collect()
    }
}

impl Serialize for WideFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_records().serialize(serializer)
    }
}

/// Builds a [`WideFrame`] from a record store
pub struct FrameBuilder;

impl FrameBuilder {
    /// Query every cataloged metric within the optional bounds and pivot the result
    pub fn build(
        store: &dyn RecordStore,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<WideFrame, ComputeError> {
        let catalog = store.catalog()?;

        let mut columns = Vec::with_capacity(catalog.len());
        for entry in &catalog {
            let observations: Vec<Observation> = store
                .query(&entry.metric_name, &entry.source, start, end)?
                .into_iter()
                .filter(|o| in_range(o.date, start, end))
                .collect();
            columns.push((entry.key(), observations));
        }

        let frame = WideFrame::from_columns(columns);
        debug!(
            rows = frame.row_count(),
            columns = frame.column_count(),
            "wide frame built"
        );
        Ok(frame)
    }
}
