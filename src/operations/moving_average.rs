//! Trailing moving average over calendar days

use chrono::NaiveDate;
use std::collections::VecDeque;

use crate::error::ComputeError;
use crate::types::{MetricSeries, SeriesPoint};

use super::{DerivedOperation, OperationParams, ParamSpec, ParamType};

const SCHEMA: &[ParamSpec] = &[ParamSpec {
    name: "window",
    param_type: ParamType::Integer,
    required: true,
    required_if: &[],
    description: "Window length in calendar days, at least 1",
}];

/// Mean of the values dated within `(d - window, d]` for each point `d`.
///
/// Needs only one available value, so early points average over whatever the
/// window holds so far. Missing values are skipped.
pub struct MovingAverage;

impl DerivedOperation for MovingAverage {
    fn name(&self) -> &'static str {
        "Moving Average"
    }

    fn slug(&self) -> &'static str {
        "moving_average"
    }

    fn schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn apply(
        &self,
        series: &MetricSeries,
        params: &OperationParams,
    ) -> Result<MetricSeries, ComputeError> {
        let window = params.integer(self.slug(), "window")?;
        if window < 1 {
            return Err(ComputeError::InvalidInput(format!(
                "moving_average: window must be at least 1, got {window}"
            )));
        }

        let mut sorted = series.points.clone();
        sorted.sort_by_key(|p| p.date);

        let mut values: VecDeque<(NaiveDate, f64)> = VecDeque::new();
        let mut points = Vec::with_capacity(sorted.len());

        for point in sorted {
            if let Some(v) = point.value {
                values.push_back((point.date, v));
            }
            while let Some(&(oldest, _)) = values.front() {
                if (point.date - oldest).num_days() >= window {
                    values.pop_front();
                } else {
                    break;
                }
            }
            points.push(SeriesPoint {
                date: point.date,
                value: rolling_average(&values),
            });
        }

        Ok(series.with_points(points))
    }
}

fn rolling_average(values: &VecDeque<(NaiveDate, f64)>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().map(|(_, v)| v).sum();
    Some(sum / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnKey;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    fn series(values: &[(u32, Option<f64>)]) -> MetricSeries {
        MetricSeries::new(
            &ColumnKey::new("whoop", "strain"),
            "score",
            values
                .iter()
                .map(|&(day, value)| SeriesPoint { date: d(day), value })
                .collect(),
        )
    }

    fn window(n: i64) -> OperationParams {
        OperationParams::new().with("window", n)
    }

    #[test]
    fn test_window_one_is_identity() {
        let input = series(&[(1, Some(0.1)), (2, Some(0.7)), (4, None), (5, Some(13.3))]);
        let out = MovingAverage.apply(&input, &window(1)).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_calendar_window_without_leading_gaps() {
        let input = series(&[(1, Some(2.0)), (2, Some(4.0)), (3, Some(6.0)), (6, Some(10.0))]);
        let out = MovingAverage.apply(&input, &window(3)).unwrap();
        let values: Vec<Option<f64>> = out.values();
        // day 1 averages itself, day 6 only sees days 4..=6
        assert_eq!(values, vec![Some(2.0), Some(3.0), Some(4.0), Some(10.0)]);
    }

    #[test]
    fn test_window_below_one_rejected() {
        let err = MovingAverage.apply(&series(&[(1, Some(1.0))]), &window(0)).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidInput(_)));
    }
}
