//! Time shift operation

use crate::align::shift_date;
use crate::error::ComputeError;
use crate::types::{MetricSeries, SeriesPoint};

use super::{DerivedOperation, OperationParams, ParamSpec, ParamType};

const SCHEMA: &[ParamSpec] = &[ParamSpec {
    name: "days",
    param_type: ParamType::Integer,
    required: true,
    required_if: &[],
    description: "Signed number of days to move every observation",
}];

/// Moves every point by a signed number of days; values are untouched
pub struct TimeShift;

impl DerivedOperation for TimeShift {
    fn name(&self) -> &'static str {
        "Time Shift"
    }

    fn slug(&self) -> &'static str {
        "time_shift"
    }

    fn schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn apply(
        &self,
        series: &MetricSeries,
        params: &OperationParams,
    ) -> Result<MetricSeries, ComputeError> {
        let days = params.integer(self.slug(), "days")?;

        let points = series
            .points
            .iter()
            .map(|p| {
                shift_date(p.date, days)
                    .map(|date| SeriesPoint {
                        date,
                        value: p.value,
                    })
                    .ok_or_else(|| {
                        ComputeError::InvalidInput(format!(
                            "time_shift: {} shifted by {} days is out of range",
                            p.date, days
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(series.with_points(points))
    }
}
