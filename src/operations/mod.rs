//! Derived operation framework
//!
//! Stateless, parameterized transforms over a single [`MetricSeries`]. Each
//! operation publishes a parameter schema; the [`OperationRegistry`] validates
//! supplied parameters against it before calling `apply`.

mod arithmetic;
mod moving_average;
mod registry;
mod time_shift;

pub use arithmetic::{Divide, Multiply};
pub use moving_average::MovingAverage;
pub use registry::{OperationDescriptor, OperationRegistry};
pub use time_shift::TimeShift;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ComputeError;
use crate::types::{ColumnKey, MetricSeries};

/// Trait for derived operations
pub trait DerivedOperation: Send + Sync {
    /// Display label
    fn name(&self) -> &'static str;

    /// Unique registry key
    fn slug(&self) -> &'static str;

    /// Parameter schema
    fn schema(&self) -> &'static [ParamSpec];

    /// Transform `series`; parameters are expected to have passed [`validate_params`]
    fn apply(
        &self,
        series: &MetricSeries,
        params: &OperationParams,
    ) -> Result<MetricSeries, ComputeError>;
}

/// Declared type of an operation parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "options", rename_all = "snake_case")]
pub enum ParamType {
    Integer,
    Number,
    /// One of a fixed set of names
    Choice(&'static [&'static str]),
    /// A second metric, referenced as `source:metric_name`
    Series,
}

/// Schema entry for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    /// Required only when every `(param, value)` condition holds
    pub required_if: &'static [(&'static str, &'static str)],
    pub description: &'static str,
}

/// Typed parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Number(f64),
    Text(String),
    Series(MetricSeries),
}

impl ParamValue {
    /// String form used to evaluate `required_if` conditions
    fn condition_text(&self) -> Option<String> {
        match self {
            ParamValue::Integer(i) => Some(i.to_string()),
            ParamValue::Number(n) => Some(n.to_string()),
            ParamValue::Text(s) => Some(s.clone()),
            ParamValue::Series(_) => None,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<MetricSeries> for ParamValue {
    fn from(value: MetricSeries) -> Self {
        ParamValue::Series(value)
    }
}

/// Parameters supplied to an operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationParams {
    values: BTreeMap<String, ParamValue>,
}

impl OperationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn missing(operation: &str, name: &str) -> ComputeError {
        ComputeError::ParameterSchema {
            operation: operation.to_string(),
            missing: vec![name.to_string()],
        }
    }

    pub fn integer(&self, operation: &str, name: &str) -> Result<i64, ComputeError> {
        match self.get(name) {
            Some(ParamValue::Integer(i)) => Ok(*i),
            Some(ParamValue::Number(n)) if n.fract() == 0.0 && n.is_finite() => Ok(*n as i64),
            Some(other) => Err(ComputeError::InvalidInput(format!(
                "{operation}: parameter '{name}' must be an integer, got {other:?}"
            ))),
            None => Err(Self::missing(operation, name)),
        }
    }

    pub fn number(&self, operation: &str, name: &str) -> Result<f64, ComputeError> {
        match self.get(name) {
            Some(ParamValue::Number(n)) => Ok(*n),
            Some(ParamValue::Integer(i)) => Ok(*i as f64),
            Some(other) => Err(ComputeError::InvalidInput(format!(
                "{operation}: parameter '{name}' must be numeric, got {other:?}"
            ))),
            None => Err(Self::missing(operation, name)),
        }
    }

    pub fn text(&self, operation: &str, name: &str) -> Result<&str, ComputeError> {
        match self.get(name) {
            Some(ParamValue::Text(s)) => Ok(s.as_str()),
            Some(other) => Err(ComputeError::InvalidInput(format!(
                "{operation}: parameter '{name}' must be text, got {other:?}"
            ))),
            None => Err(Self::missing(operation, name)),
        }
    }

    pub fn series(&self, operation: &str, name: &str) -> Result<&MetricSeries, ComputeError> {
        match self.get(name) {
            Some(ParamValue::Series(s)) => Ok(s),
            Some(other) => Err(ComputeError::InvalidInput(format!(
                "{operation}: parameter '{name}' must be a series, got {other:?}"
            ))),
            None => Err(Self::missing(operation, name)),
        }
    }
}

/// Check `params` against `schema`, reporting every missing parameter at once.
///
/// A `required` parameter must always be present. A parameter with `required_if`
/// must be present only when all of its conditions match the supplied values.
pub fn validate_params(
    operation: &str,
    schema: &[ParamSpec],
    params: &OperationParams,
) -> Result<(), ComputeError> {
    let mut missing = Vec::new();

    for spec in schema {
        if params.contains(spec.name) {
            continue;
        }
        if spec.required {
            missing.push(spec.name.to_string());
            continue;
        }
        let conditional = !spec.required_if.is_empty()
            && spec.required_if.iter().all(|(key, expected)| {
                params
                    .get(key)
                    .and_then(ParamValue::condition_text)
                    .is_some_and(|actual| actual == *expected)
            });
        if conditional {
            missing.push(spec.name.to_string());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ComputeError::ParameterSchema {
            operation: operation.to_string(),
            missing,
        })
    }
}

/// Convert raw JSON parameters into typed values following `schema`.
///
/// Numbers may arrive as JSON numbers or numeric strings, as form input does.
/// Series parameters are `source:metric_name` references resolved through
/// `resolve_series`. Keys not in the schema are ignored.
pub fn coerce_params<F>(
    operation: &str,
    schema: &[ParamSpec],
    raw: &Map<String, Value>,
    mut resolve_series: F,
) -> Result<OperationParams, ComputeError>
where
    F: FnMut(&ColumnKey) -> Result<MetricSeries, ComputeError>,
{
    let mut params = OperationParams::new();

    for spec in schema {
        let Some(value) = raw.get(spec.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        let typed = match spec.param_type {
            ParamType::Integer => {
                let n = numeric(operation, spec.name, value)?;
                if n.fract() != 0.0 {
                    return Err(ComputeError::InvalidInput(format!(
                        "{operation}: parameter '{}' must be an integer, got {n}",
                        spec.name
                    )));
                }
                ParamValue::Integer(n as i64)
            }
            ParamType::Number => ParamValue::Number(numeric(operation, spec.name, value)?),
            ParamType::Choice(options) => {
                let text = value.as_str().ok_or_else(|| {
                    ComputeError::InvalidInput(format!(
                        "{operation}: parameter '{}' must be one of {}",
                        spec.name,
                        options.join(", ")
                    ))
                })?;
                if !options.contains(&text) {
                    return Err(ComputeError::InvalidInput(format!(
                        "{operation}: parameter '{}' must be one of {}, got '{text}'",
                        spec.name,
                        options.join(", ")
                    )));
                }
                ParamValue::Text(text.to_string())
            }
            ParamType::Series => match value {
                Value::String(reference) => {
                    let key: ColumnKey = reference
                        .parse()
                        .map_err(|e: String| ComputeError::InvalidInput(format!("{operation}: {e}")))?;
                    ParamValue::Series(resolve_series(&key)?)
                }
                other => ParamValue::Series(serde_json::from_value(other.clone())?),
            },
        };
        params.insert(spec.name, typed);
    }

    Ok(params)
}

fn numeric(operation: &str, name: &str, value: &Value) -> Result<f64, ComputeError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(ComputeError::InvalidInput(format!(
            "{operation}: parameter '{name}' must be numeric, got {value}"
        ))),
    }
}
