//! Column alignment and missing-data resolution
//!
//! Extracts two columns from a wide frame, shifts lag-sensitive metrics by their
//! source's day offset, counts valid pairs and reconciles gaps according to the
//! requested [`MissingPolicy`].

use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{CorrelationError, FailureKind};
use crate::frame::WideFrame;
use crate::types::{ColumnKey, MissingPolicy, PairedPoint};

/// Nightly metrics whose value is recorded on the morning after the night it describes
pub const DEFAULT_LAG_SENSITIVE_METRICS: &[&str] = &[
    "sleep_duration",
    "total_sleep",
    "total_sleep_duration",
    "time_in_bed",
    "deep_sleep",
    "deep_sleep_duration",
    "rem_sleep",
    "rem_sleep_duration",
    "light_sleep",
    "light_sleep_duration",
    "awake_time",
    "sleep_latency",
    "sleep_score",
    "sleep_efficiency",
    "sleep_performance",
    "hrv",
    "average_hrv",
    "resting_heart_rate",
    "lowest_heart_rate",
    "respiratory_rate",
];

/// Lower-case, trimmed, with spaces and hyphens folded to underscores
pub fn canonical_metric_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// A column pair ready for the coefficient
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPair {
    pub points: Vec<PairedPoint>,
    pub total_rows: usize,
    pub valid_pairs: usize,
    pub missing_counts: BTreeMap<String, usize>,
    /// Shifts actually applied, keyed by column
    pub applied_shifts: BTreeMap<String, i64>,
}

impl ResolvedPair {
    pub fn xs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }
}

/// Resolver for column pairs
#[derive(Debug, Clone)]
pub struct AlignmentResolver {
    lag_sensitive: BTreeSet<String>,
}

impl Default for AlignmentResolver {
    fn default() -> Self {
        Self::new(DEFAULT_LAG_SENSITIVE_METRICS.iter().copied())
    }
}

impl AlignmentResolver {
    pub fn new<I, S>(lag_sensitive_metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            lag_sensitive: lag_sensitive_metrics
                .into_iter()
                .map(|m| canonical_metric_name(m.as_ref()))
                .collect(),
        }
    }

    pub fn is_lag_sensitive(&self, metric_name: &str) -> bool {
        self.lag_sensitive
            .contains(&canonical_metric_name(metric_name))
    }

    /// Day shift for `key`: only when its source has an offset AND the metric is
    /// on the allow-list. Other metrics of the same source are never shifted.
    pub fn shift_for(&self, key: &ColumnKey, shifts: &BTreeMap<String, i64>) -> Option<i64> {
        let days = *shifts.get(&key.source)?;
        if days != 0 && self.is_lag_sensitive(&key.metric_name) {
            Some(days)
        } else {
            None
        }
    }

    /// Extract, shift and reconcile a column pair.
    ///
    /// Fails with [`FailureKind::ColumnNotFound`] if either column is absent and with
    /// [`FailureKind::InsufficientData`] when fewer than `min_pairs` dates carry both
    /// values.
    pub fn resolve(
        &self,
        frame: &WideFrame,
        first: &ColumnKey,
        second: &ColumnKey,
        shifts: &BTreeMap<String, i64>,
        min_pairs: usize,
        policy: MissingPolicy,
    ) -> Result<ResolvedPair, CorrelationError> {
        for key in [first, second] {
            if !frame.contains(key) {
                return Err(CorrelationError::column_not_found(&key.to_string(), min_pairs));
            }
        }

        let mut applied_shifts = BTreeMap::new();
        let mut shifted = |key: &ColumnKey| -> Result<Vec<(NaiveDate, f64)>, CorrelationError> {
            let observed = frame.observed(key);
            let Some(days) = self.shift_for(key, shifts) else {
                return Ok(observed);
            };
            debug!(column = %key, days, "applying time shift");
            applied_shifts.insert(key.to_string(), days);
            observed
                .into_iter()
                .map(|(date, v)| {
                    shift_date(date, days).map(|d| (d, v)).ok_or_else(|| {
                        CorrelationError::invalid_input(
                            format!("Shifting {key} by {days} days leaves the calendar range"),
                            min_pairs,
                        )
                    })
                })
                .collect()
        };
        let first_values = shifted(first)?;
        let second_values = shifted(second)?;

        // Two-column sub-table over the union of (shifted) dates
        let mut rows: BTreeMap<NaiveDate, (Option<f64>, Option<f64>)> = BTreeMap::new();
        for (date, v) in first_values {
            rows.entry(date).or_default().0 = Some(v);
        }
        for (date, v) in second_values {
            rows.entry(date).or_default().1 = Some(v);
        }

        let dates: Vec<NaiveDate> = rows.keys().copied().collect();
        let mut xs: Vec<Option<f64>> = rows.values().map(|r| r.0).collect();
        let mut ys: Vec<Option<f64>> = rows.values().map(|r| r.1).collect();

        let total_rows = dates.len();
        let missing_x = xs.iter().filter(|v| v.is_none()).count();
        let missing_y = ys.iter().filter(|v| v.is_none()).count();
        let valid_pairs = xs
            .iter()
            .zip(&ys)
            .filter(|(x, y)| x.is_some() && y.is_some())
            .count();

        let mut missing_counts = BTreeMap::new();
        missing_counts.insert(first.to_string(), missing_x);
        missing_counts.insert(second.to_string(), missing_y);

        if valid_pairs < min_pairs {
            return Err(CorrelationError {
                kind: FailureKind::InsufficientData,
                message: format!(
                    "Insufficient overlapping data: {valid_pairs} valid pairs, {min_pairs} required"
                ),
                total_rows,
                valid_pairs,
                min_pairs,
                missing_counts,
            });
        }

        // Nothing to fill: every policy behaves like drop.
        let effective = if missing_x == 0 && missing_y == 0 {
            MissingPolicy::Drop
        } else {
            policy
        };

        match effective {
            MissingPolicy::Drop => {}
            MissingPolicy::Interpolate => {
                interpolate(&dates, &mut xs);
                interpolate(&dates, &mut ys);
            }
            MissingPolicy::ForwardFill => {
                forward_fill(&mut xs);
                forward_fill(&mut ys);
            }
        }

        let points = dates
            .iter()
            .zip(xs.iter().zip(&ys))
            .filter_map(|(date, (x, y))| match (x, y) {
                (Some(x), Some(y)) => Some(PairedPoint {
                    date: *date,
                    x: *x,
                    y: *y,
                }),
                _ => None,
            })
            .collect();

        Ok(ResolvedPair {
            points,
            total_rows,
            valid_pairs,
            missing_counts,
            applied_shifts,
        })
    }
}

/// Move a date by a signed number of days
pub fn shift_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    let magnitude = Days::new(days.unsigned_abs());
    if days >= 0 {
        date.checked_add_days(magnitude)
    } else {
        date.checked_sub_days(magnitude)
    }
}

/// Linear interpolation weighted by calendar distance between observed
/// neighbours. Leading and trailing gaps stay empty.
fn interpolate(dates: &[NaiveDate], values: &mut [Option<f64>]) {
    let known: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_some()).collect();
    for window in known.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        if hi - lo < 2 {
            continue;
        }
        let (Some(v_lo), Some(v_hi)) = (values[lo], values[hi]) else {
            continue;
        };
        let span = (dates[hi] - dates[lo]).num_days() as f64;
        for i in (lo + 1)..hi {
            let offset = (dates[i] - dates[lo]).num_days() as f64;
            values[i] = Some(v_lo + (v_hi - v_lo) * offset / span);
        }
    }
}

/// Carry the last observed value forward. Leading gaps stay empty.
fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for value in values.iter_mut() {
        match value {
            Some(v) => last = Some(*v),
            None => *value = last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Observation;
    use pretty_assertions::assert_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn column(key: &ColumnKey, values: &[(u32, f64)]) -> (ColumnKey, Vec<Observation>) {
        (
            key.clone(),
            values
                .iter()
                .map(|&(day, v)| Observation::new(d(day), v, "u"))
                .collect(),
        )
    }

    fn keys() -> (ColumnKey, ColumnKey) {
        (ColumnKey::new("a", "steps"), ColumnKey::new("b", "mood"))
    }

    #[test]
    fn test_disjoint_dates_have_no_valid_pairs() {
        let (a, b) = keys();
        let frame = WideFrame::from_columns(vec![
            column(&a, &[(1, 1.0), (3, 3.0)]),
            column(&b, &[(2, 2.0), (4, 4.0)]),
        ]);

        let err = AlignmentResolver::default()
            .resolve(&frame, &a, &b, &BTreeMap::new(), 1, MissingPolicy::Drop)
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InsufficientData);
        assert_eq!(err.valid_pairs, 0);
        assert_eq!(err.total_rows, 4);
        assert_eq!(err.missing_counts["a:steps"], 2);
        assert_eq!(err.missing_counts["b:mood"], 2);
    }

    #[test]
    fn test_min_pairs_boundary() {
        let (a, b) = keys();
        let frame = WideFrame::from_columns(vec![
            column(&a, &[(1, 1.0), (2, 2.0), (3, 3.0)]),
            column(&b, &[(1, 5.0), (2, 4.0), (3, 9.0)]),
        ]);
        let resolver = AlignmentResolver::default();
        let shifts = BTreeMap::new();

        assert!(resolver
            .resolve(&frame, &a, &b, &shifts, 3, MissingPolicy::Drop)
            .is_ok());
        let err = resolver
            .resolve(&frame, &a, &b, &shifts, 4, MissingPolicy::Drop)
            .unwrap_err();
        assert_eq!(err.valid_pairs, 3);
        assert_eq!(err.min_pairs, 4);
    }

    #[test]
    fn test_interpolate_uses_calendar_distance() {
        let (a, b) = keys();
        let frame = WideFrame::from_columns(vec![
            column(&a, &[(1, 10.0), (2, 99.0), (5, 40.0)]),
            column(&b, &[(1, 1.0), (2, 2.0), (4, 4.0), (5, 5.0)]),
        ]);

        let pair = AlignmentResolver::default()
            .resolve(&frame, &a, &b, &BTreeMap::new(), 2, MissingPolicy::Interpolate)
            .unwrap();
        assert_eq!(pair.valid_pairs, 3);
        assert_eq!(pair.points.len(), 4);
        // day 4 sits 2/3 of the way from day 2 (99) to day 5 (40)
        let day4 = pair.points.iter().find(|p| p.date == d(4)).unwrap();
        assert!((day4.x - (99.0 + (40.0 - 99.0) * 2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_forward_fill_leaves_leading_gap() {
        let (a, b) = keys();
        let frame = WideFrame::from_columns(vec![
            column(&a, &[(2, 20.0), (3, 30.0)]),
            column(&b, &[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]),
        ]);

        let pair = AlignmentResolver::default()
            .resolve(&frame, &a, &b, &BTreeMap::new(), 2, MissingPolicy::ForwardFill)
            .unwrap();
        let dates: Vec<NaiveDate> = pair.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![d(2), d(3), d(4)]);
        assert_eq!(pair.points[2].x, 30.0);
    }

    #[test]
    fn test_policies_agree_without_gaps() {
        let (a, b) = keys();
        let frame = WideFrame::from_columns(vec![
            column(&a, &[(1, 1.0), (2, 2.0), (3, 4.0)]),
            column(&b, &[(1, 3.0), (2, 1.0), (3, 2.0)]),
        ]);
        let resolver = AlignmentResolver::default();
        let shifts = BTreeMap::new();

        let drop = resolver
            .resolve(&frame, &a, &b, &shifts, 1, MissingPolicy::Drop)
            .unwrap();
        for policy in [MissingPolicy::Interpolate, MissingPolicy::ForwardFill] {
            let other = resolver
                .resolve(&frame, &a, &b, &shifts, 1, policy)
                .unwrap();
            assert_eq!(drop, other);
        }
    }

    #[test]
    fn test_shift_only_applies_to_allow_listed_metrics() {
        let sleep = ColumnKey::new("oura", "Sleep Duration");
        let steps = ColumnKey::new("oura", "steps");
        let mood = ColumnKey::new("custom", "mood");
        let frame = WideFrame::from_columns(vec![
            column(&sleep, &[(2, 7.0), (3, 8.0)]),
            column(&steps, &[(1, 5000.0), (2, 9000.0)]),
            column(&mood, &[(1, 3.0), (2, 4.0)]),
        ]);
        let resolver = AlignmentResolver::default();
        let shifts: BTreeMap<String, i64> = [("oura".to_string(), -1)].into_iter().collect();

        // sleep recorded on the 2nd and 3rd belongs to the 1st and 2nd
        let pair = resolver
            .resolve(&frame, &sleep, &mood, &shifts, 2, MissingPolicy::Drop)
            .unwrap();
        assert_eq!(pair.valid_pairs, 2);
        assert_eq!(pair.applied_shifts["oura:Sleep Duration"], -1);

        // steps share the source but are not lag sensitive
        let pair = resolver
            .resolve(&frame, &steps, &mood, &shifts, 2, MissingPolicy::Drop)
            .unwrap();
        assert!(pair.applied_shifts.is_empty());
        assert_eq!(pair.points[0].date, d(1));
    }

    #[test]
    fn test_shift_beyond_calendar_is_invalid_input() {
        let sleep = ColumnKey::new("oura", "total_sleep");
        let mood = ColumnKey::new("custom", "mood");
        let frame = WideFrame::from_columns(vec![
            column(&sleep, &[(1, 7.0), (2, 8.0), (3, 6.5)]),
            column(&mood, &[(1, 3.0), (2, 4.0), (3, 2.0)]),
        ]);
        let shifts: BTreeMap<String, i64> = [("oura".to_string(), i64::MAX)].into_iter().collect();

        let err = AlignmentResolver::default()
            .resolve(&frame, &sleep, &mood, &shifts, 3, MissingPolicy::Drop)
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InputValidation);
        assert_eq!(err.min_pairs, 3);
    }

    #[test]
    fn test_missing_column() {
        let (a, b) = keys();
        let frame = WideFrame::from_columns(vec![column(&a, &[(1, 1.0)])]);
        let err = AlignmentResolver::default()
            .resolve(&frame, &a, &b, &BTreeMap::new(), 1, MissingPolicy::Drop)
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::ColumnNotFound);
    }

    #[test]
    fn test_canonical_metric_name() {
        assert_eq!(canonical_metric_name(" Deep-Sleep Duration "), "deep_sleep_duration");
    }
}
