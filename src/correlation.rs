//! Correlation scoring and interpretation
//!
//! Turns a resolved series pair into [`CorrelationStats`]: coefficient,
//! significance and a short human-readable interpretation.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::align::ResolvedPair;
use crate::error::{CorrelationError, FailureKind};
use crate::stats;
use crate::types::{CorrelationMethod, CorrelationStats, PairedPoint};

/// Strength band for `|coefficient|`
pub fn strength_label(coefficient: f64) -> &'static str {
    let magnitude = coefficient.abs();
    if magnitude < 0.1 {
        "negligible"
    } else if magnitude < 0.3 {
        "weak"
    } else if magnitude < 0.5 {
        "moderate"
    } else if magnitude < 0.7 {
        "strong"
    } else {
        "very strong"
    }
}

pub fn direction_label(coefficient: f64) -> &'static str {
    if coefficient >= 0.0 {
        "positive"
    } else {
        "negative"
    }
}

pub fn significance_label(p_value: f64) -> &'static str {
    if p_value < 0.001 {
        "highly significant"
    } else if p_value < 0.05 {
        // covers both the < 0.01 and < 0.05 bands
        "significant"
    } else if p_value < 0.1 {
        "marginally significant"
    } else {
        "not significant"
    }
}

/// `"A {strength} {direction} correlation, {significance}"`
pub fn interpret(coefficient: f64, p_value: f64) -> String {
    format!(
        "A {} {} correlation, {}",
        strength_label(coefficient),
        direction_label(coefficient),
        significance_label(p_value)
    )
}

/// Score a resolved pair with `method`
pub fn score(
    method: CorrelationMethod,
    pair: ResolvedPair,
    min_pairs: usize,
) -> Result<CorrelationStats, CorrelationError> {
    let coefficient = stats::correlate(method, &pair.xs(), &pair.ys()).ok_or_else(|| {
        CorrelationError {
            kind: FailureKind::InsufficientData,
            message: format!(
                "Correlation undefined: {} points with at least one constant column",
                pair.points.len()
            ),
            total_rows: pair.total_rows,
            valid_pairs: pair.valid_pairs,
            min_pairs,
            missing_counts: pair.missing_counts.clone(),
        }
    })?;

    Ok(CorrelationStats {
        coefficient: coefficient.value,
        p_value: coefficient.p_value,
        method,
        interpretation: interpret(coefficient.value, coefficient.p_value),
        valid_pairs: pair.valid_pairs,
        total_rows: pair.total_rows,
        missing_counts: pair.missing_counts,
        points: pair.points,
    })
}

/// Pair each observation with whole days elapsed since the first one.
///
/// Returns the origin date and a pair whose `x` is elapsed days and `y` the value,
/// or an insufficient-data failure when fewer than `min_pairs` observations exist.
pub fn time_trend_pair(
    column: &str,
    observed: &[(NaiveDate, f64)],
    total_rows: usize,
    min_pairs: usize,
) -> Result<(NaiveDate, ResolvedPair), CorrelationError> {
    let mut missing_counts = BTreeMap::new();
    missing_counts.insert(column.to_string(), total_rows.saturating_sub(observed.len()));

    let insufficient = |message: String| CorrelationError {
        kind: FailureKind::InsufficientData,
        message,
        total_rows,
        valid_pairs: observed.len(),
        min_pairs,
        missing_counts: missing_counts.clone(),
    };

    let Some(&(origin, _)) = observed.first() else {
        return Err(insufficient(format!("No observations for {column}")));
    };
    if observed.len() < min_pairs {
        return Err(insufficient(format!(
            "Insufficient data: {} observations, {} required",
            observed.len(),
            min_pairs
        )));
    }

    let points = observed
        .iter()
        .map(|&(date, value)| PairedPoint {
            date,
            x: (date - origin).num_days() as f64,
            y: value,
        })
        .collect();

    Ok((
        origin,
        ResolvedPair {
            points,
            total_rows,
            valid_pairs: observed.len(),
            missing_counts,
            applied_shifts: BTreeMap::new(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_bands() {
        assert_eq!(strength_label(0.05), "negligible");
        assert_eq!(strength_label(-0.2), "weak");
        assert_eq!(strength_label(0.3), "moderate");
        assert_eq!(strength_label(-0.69), "strong");
        assert_eq!(strength_label(0.7), "very strong");
        assert_eq!(strength_label(-1.0), "very strong");
    }

    #[test]
    fn test_significance_bands() {
        assert_eq!(significance_label(0.0005), "highly significant");
        assert_eq!(significance_label(0.005), "significant");
        assert_eq!(significance_label(0.03), "significant");
        assert_eq!(significance_label(0.07), "marginally significant");
        assert_eq!(significance_label(0.5), "not significant");
    }

    #[test]
    fn test_interpretation_text() {
        assert_eq!(
            interpret(-0.82, 0.0001),
            "A very strong negative correlation, highly significant"
        );
        assert_eq!(
            interpret(0.15, 0.4),
            "A weak positive correlation, not significant"
        );
    }

    #[test]
    fn test_time_trend_elapsed_days() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let observed = vec![(d(3), 1.0), (d(4), 2.0), (d(10), 5.0)];
        let (origin, pair) = time_trend_pair("x:y", &observed, 5, 3).unwrap();
        assert_eq!(origin, d(3));
        assert_eq!(pair.xs(), vec![0.0, 1.0, 7.0]);
        assert_eq!(pair.missing_counts["x:y"], 2);

        let err = time_trend_pair("x:y", &observed, 5, 4).unwrap_err();
        assert_eq!(err.valid_pairs, 3);
    }
}
