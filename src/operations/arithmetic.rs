//! Multiply and divide operations
//!
//! Both work against either a scalar constant or a second series joined on date.
//! Only dates present in both series contribute to a series result.

use std::collections::BTreeMap;

use crate::error::ComputeError;
use crate::types::{MetricSeries, SeriesPoint};

use super::{DerivedOperation, OperationParams, ParamSpec, ParamType};

const OPERAND_SCALAR: &str = "scalar";
const OPERAND_SERIES: &str = "series";

const SCHEMA: &[ParamSpec] = &[
    ParamSpec {
        name: "operand",
        param_type: ParamType::Choice(&[OPERAND_SCALAR, OPERAND_SERIES]),
        required: true,
        required_if: &[],
        description: "Whether the right-hand side is a constant or another series",
    },
    ParamSpec {
        name: "scalar",
        param_type: ParamType::Number,
        required: false,
        required_if: &[("operand", OPERAND_SCALAR)],
        description: "Constant right-hand side",
    },
    ParamSpec {
        name: "other",
        param_type: ParamType::Series,
        required: false,
        required_if: &[("operand", OPERAND_SERIES)],
        description: "Right-hand series as source:metric_name",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arithmetic {
    Multiply,
    Divide,
}

impl Arithmetic {
    fn slug(&self) -> &'static str {
        match self {
            Arithmetic::Multiply => "multiply",
            Arithmetic::Divide => "divide",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Arithmetic::Multiply => "*",
            Arithmetic::Divide => "/",
        }
    }

    /// Division by a zero cell yields a missing value rather than an error
    fn combine(&self, left: Option<f64>, right: Option<f64>) -> Option<f64> {
        match (self, left, right) {
            (_, None, _) | (_, _, None) => None,
            (Arithmetic::Multiply, Some(l), Some(r)) => Some(l * r),
            (Arithmetic::Divide, Some(_), Some(r)) if r == 0.0 => None,
            (Arithmetic::Divide, Some(l), Some(r)) => Some(l / r),
        }
    }

    fn apply(
        &self,
        series: &MetricSeries,
        params: &OperationParams,
    ) -> Result<MetricSeries, ComputeError> {
        let slug = self.slug();
        match params.text(slug, "operand")? {
            OPERAND_SCALAR => {
                let scalar = params.number(slug, "scalar")?;
                if *self == Arithmetic::Divide && scalar == 0.0 {
                    return Err(ComputeError::InvalidInput(
                        "divide: scalar divisor must not be zero".to_string(),
                    ));
                }
                let points = series
                    .points
                    .iter()
                    .map(|p| SeriesPoint {
                        date: p.date,
                        value: self.combine(p.value, Some(scalar)),
                    })
                    .collect();
                Ok(series.with_points(points))
            }
            OPERAND_SERIES => {
                let other = params.series(slug, "other")?;
                let right: BTreeMap<_, _> = other.points.iter().map(|p| (p.date, p.value)).collect();
                let points = series
                    .points
                    .iter()
                    .filter_map(|p| {
                        right.get(&p.date).map(|r| SeriesPoint {
                            date: p.date,
                            value: self.combine(p.value, *r),
                        })
                    })
                    .collect();
                let mut result = series.with_points(points);
                result.unit = format!("{}{}{}", series.unit, self.symbol(), other.unit);
                Ok(result)
            }
            other => Err(ComputeError::InvalidInput(format!(
                "{slug}: unknown operand '{other}'"
            ))),
        }
    }
}

/// Multiply a series by a constant or, date by date, by another series
pub struct Multiply;

impl DerivedOperation for Multiply {
    fn name(&self) -> &'static str {
        "Multiply"
    }

    fn slug(&self) -> &'static str {
        Arithmetic::Multiply.slug()
    }

    fn schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn apply(
        &self,
        series: &MetricSeries,
        params: &OperationParams,
    ) -> Result<MetricSeries, ComputeError> {
        Arithmetic::Multiply.apply(series, params)
    }
}

/// Divide a series by a constant or, date by date, by another series.
///
/// A zero constant is rejected up front; a zero cell in the other series only
/// blanks that row.
pub struct Divide;

impl DerivedOperation for Divide {
    fn name(&self) -> &'static str {
        "Divide"
    }

    fn slug(&self) -> &'static str {
        Arithmetic::Divide.slug()
    }

    fn schema(&self) -> &'static [ParamSpec] {
        SCHEMA
    }

    fn apply(
        &self,
        series: &MetricSeries,
        params: &OperationParams,
    ) -> Result<MetricSeries, ComputeError> {
        Arithmetic::Divide.apply(series, params)
    }
}
