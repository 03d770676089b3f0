//! Core types for Synheart Correlate
//!
//! This module defines the data structures that flow through the engine:
//! tagged observations from the record store, metric series, correlation
//! requests and the results handed back to callers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CorrelationError;

/// A single daily observation as exposed by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
    pub unit: String,
}

impl Observation {
    pub fn new(date: NaiveDate, value: f64, unit: impl Into<String>) -> Self {
        Self {
            date,
            value,
            unit: unit.into(),
        }
    }
}

/// Column identifier: a metric reported by a particular source.
///
/// Displays and parses as `source:metric_name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub source: String,
    pub metric_name: String,
}

impl ColumnKey {
    pub fn new(source: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.metric_name)
    }
}

impl FromStr for ColumnKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((source, metric)) if !source.is_empty() && !metric.is_empty() => {
                Ok(ColumnKey::new(source.trim(), metric.trim()))
            }
            _ => Err(format!("expected 'source:metric_name', got '{s}'")),
        }
    }
}

/// Catalog entry describing one stored metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub metric_name: String,
    pub source: String,
    pub unit: String,
    pub observation_count: usize,
}

impl CatalogEntry {
    pub fn key(&self) -> ColumnKey {
        ColumnKey::new(self.source.clone(), self.metric_name.clone())
    }
}

/// One dated value of a series; `None` means no usable value for that day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// An ordered daily series for a single `(source, metric_name)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub source: String,
    pub metric_name: String,
    pub unit: String,
    pub points: Vec<SeriesPoint>,
}

impl MetricSeries {
    pub fn new(key: &ColumnKey, unit: impl Into<String>, points: Vec<SeriesPoint>) -> Self {
        Self {
            source: key.source.clone(),
            metric_name: key.metric_name.clone(),
            unit: unit.into(),
            points,
        }
    }

    /// Build a series from store observations.
    ///
    /// The unit is taken from the first observation, falling back to `fallback_unit`
    /// for an empty series.
    pub fn from_observations(
        key: &ColumnKey,
        fallback_unit: &str,
        observations: &[Observation],
    ) -> Self {
        let unit = observations
            .first()
            .map(|o| o.unit.clone())
            .unwrap_or_else(|| fallback_unit.to_string());
        let points = observations
            .iter()
            .map(|o| SeriesPoint {
                date: o.date,
                value: Some(o.value),
            })
            .collect();
        Self::new(key, unit, points)
    }

    pub fn key(&self) -> ColumnKey {
        ColumnKey::new(self.source.clone(), self.metric_name.clone())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Same identity and unit, new points
    pub fn with_points(&self, points: Vec<SeriesPoint>) -> Self {
        Self {
            source: self.source.clone(),
            metric_name: self.metric_name.clone(),
            unit: self.unit.clone(),
            points,
        }
    }
}

/// Correlation coefficient family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
    Kendall,
}

impl CorrelationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
            CorrelationMethod::Kendall => "kendall",
        }
    }
}

impl FromStr for CorrelationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            "kendall" => Ok(CorrelationMethod::Kendall),
            other => Err(format!(
                "Unknown correlation method '{other}' (expected pearson, spearman or kendall)"
            )),
        }
    }
}

/// How missing cells in a column pair are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    Drop,
    Interpolate,
    ForwardFill,
}

impl MissingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingPolicy::Drop => "drop",
            MissingPolicy::Interpolate => "interpolate",
            MissingPolicy::ForwardFill => "forward_fill",
        }
    }
}

impl FromStr for MissingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(MissingPolicy::Drop),
            "interpolate" => Ok(MissingPolicy::Interpolate),
            "forward_fill" | "ffill" => Ok(MissingPolicy::ForwardFill),
            other => Err(format!(
                "Unknown missing-data policy '{other}' (expected drop, interpolate or forward_fill)"
            )),
        }
    }
}

/// Correlation request as received from a caller.
///
/// `method` and `missing_policy` stay as names so an unrecognized value comes
/// back as an input-validation failure instead of a deserialization fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationRequest {
    pub method: String,
    pub min_pairs: usize,
    pub missing_policy: String,
    /// Day offsets keyed by source
    pub time_shift: BTreeMap<String, i64>,
    pub use_density: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl Default for CorrelationRequest {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::Pearson.as_str().to_string(),
            min_pairs: 3,
            missing_policy: MissingPolicy::Drop.as_str().to_string(),
            time_shift: BTreeMap::new(),
            use_density: false,
            start: None,
            end: None,
        }
    }
}

impl CorrelationRequest {
    pub fn with_method(mut self, method: CorrelationMethod) -> Self {
        self.method = method.as_str().to_string();
        self
    }

    pub fn with_policy(mut self, policy: MissingPolicy) -> Self {
        self.missing_policy = policy.as_str().to_string();
        self
    }

    pub fn with_min_pairs(mut self, min_pairs: usize) -> Self {
        self.min_pairs = min_pairs;
        self
    }

    pub fn with_shift(mut self, source: impl Into<String>, days: i64) -> Self {
        self.time_shift.insert(source.into(), days);
        self
    }

    pub fn with_density(mut self, use_density: bool) -> Self {
        self.use_density = use_density;
        self
    }

    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// One aligned row that entered the coefficient
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairedPoint {
    pub date: NaiveDate,
    pub x: f64,
    pub y: f64,
}

/// Statistics shared by every correlation mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationStats {
    /// Coefficient in [-1, 1]
    pub coefficient: f64,
    /// Two-sided significance in [0, 1]
    pub p_value: f64,
    pub method: CorrelationMethod,
    pub interpretation: String,
    /// Rows where both columns were observed before any filling
    pub valid_pairs: usize,
    pub total_rows: usize,
    pub missing_counts: BTreeMap<String, usize>,
    pub points: Vec<PairedPoint>,
}

/// Two metrics compared against each other
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseResult {
    pub metric1: ColumnKey,
    pub metric2: ColumnKey,
    pub missing_policy: MissingPolicy,
    /// Day shifts that were actually applied, keyed by column
    pub applied_shifts: BTreeMap<String, i64>,
    #[serde(flatten)]
    pub stats: CorrelationStats,
}

/// One metric compared against elapsed days since its first observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeTrendResult {
    pub metric: ColumnKey,
    /// First observed date; `x` in the points is whole days since this date
    pub origin: NaiveDate,
    #[serde(flatten)]
    pub stats: CorrelationStats,
}

/// Successful correlation, tagged by mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CorrelationReport {
    TimeTrend(TimeTrendResult),
    Pairwise(PairwiseResult),
}

impl CorrelationReport {
    pub fn stats(&self) -> &CorrelationStats {
        match self {
            CorrelationReport::TimeTrend(r) => &r.stats,
            CorrelationReport::Pairwise(r) => &r.stats,
        }
    }

    pub fn coefficient(&self) -> f64 {
        self.stats().coefficient
    }

    pub fn p_value(&self) -> f64 {
        self.stats().p_value
    }
}

/// Wire shape of a single correlation call: exactly one of result or error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CorrelationOutcome {
    Ok { result: CorrelationReport },
    Error { error: CorrelationError },
}

impl From<Result<CorrelationReport, CorrelationError>> for CorrelationOutcome {
    fn from(result: Result<CorrelationReport, CorrelationError>) -> Self {
        match result {
            Ok(result) => CorrelationOutcome::Ok { result },
            Err(error) => CorrelationOutcome::Error { error },
        }
    }
}

/// Entry of a "top correlates" ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCorrelate {
    pub metric: ColumnKey,
    pub coefficient: f64,
    pub p_value: f64,
    pub valid_pairs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_key_round_trips_through_display() {
        let key: ColumnKey = "cronometer:Energy (kcal)".parse().unwrap();
        assert_eq!(key.source, "cronometer");
        assert_eq!(key.metric_name, "Energy (kcal)");
        assert_eq!(key.to_string(), "cronometer:Energy (kcal)");
    }

    #[test]
    fn test_column_key_rejects_missing_source() {
        assert!("hrv".parse::<ColumnKey>().is_err());
        assert!(":hrv".parse::<ColumnKey>().is_err());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(
            "Spearman".parse::<CorrelationMethod>(),
            Ok(CorrelationMethod::Spearman)
        );
        assert!("cosine".parse::<CorrelationMethod>().is_err());
        assert_eq!(
            "forward_fill".parse::<MissingPolicy>(),
            Ok(MissingPolicy::ForwardFill)
        );
    }

    #[test]
    fn test_outcome_serializes_status_tag() {
        let failure = CorrelationError::invalid_input("bad", 3);
        let outcome = CorrelationOutcome::from(Err(failure));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "input_validation");
        assert_eq!(json["error"]["min_pairs"], 3);
    }
}
