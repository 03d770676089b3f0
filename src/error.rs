//! Error types for Synheart Correlate
//!
//! Two families live here. [`CorrelationError`] is a structured *value* returned
//! at the correlation boundary so batch callers can skip a failing pair and keep
//! going. [`ComputeError`] is raised for caller or configuration mistakes, such
//! as an operation invoked without its required parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Classification of a correlation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown method or missing-data policy
    InputValidation,
    /// Fewer valid pairs than requested, or a constant column
    InsufficientData,
    /// Requested column is absent from the materialized frame
    ColumnNotFound,
    /// The record store could not be read
    Store,
}

/// Structured failure of a single correlation request.
///
/// Carries enough counts that a caller can explain why no coefficient was
/// produced without re-running the computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct CorrelationError {
    pub kind: FailureKind,
    pub message: String,
    /// Rows in the two-column sub-table (0 when it was never built)
    pub total_rows: usize,
    pub valid_pairs: usize,
    pub min_pairs: usize,
    /// Missing cells per column, keyed by `source:metric_name`
    pub missing_counts: BTreeMap<String, usize>,
}

impl CorrelationError {
    /// Failure that happened before any data was materialized
    pub fn without_data(kind: FailureKind, message: impl Into<String>, min_pairs: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            total_rows: 0,
            valid_pairs: 0,
            min_pairs,
            missing_counts: BTreeMap::new(),
        }
    }

    pub fn invalid_input(message: impl Into<String>, min_pairs: usize) -> Self {
        Self::without_data(FailureKind::InputValidation, message, min_pairs)
    }

    pub fn column_not_found(column: &str, min_pairs: usize) -> Self {
        Self::without_data(
            FailureKind::ColumnNotFound,
            format!("Column not found: {column}"),
            min_pairs,
        )
    }

    pub fn is_insufficient_data(&self) -> bool {
        self.kind == FailureKind::InsufficientData
    }
}

/// Errors raised by the engine and the derived operation framework
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required parameters for '{operation}': {}", .missing.join(", "))]
    ParameterSchema {
        operation: String,
        missing: Vec<String>,
    },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation already registered: {0}")]
    DuplicateOperation(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Record store error: {0}")]
    StoreError(String),

    #[error("Failed to parse observations: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

/// Errors raised while loading or validating an [`EngineConfig`](crate::config::EngineConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Invalid TOML in {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    ValidationFailed { field: String, message: String },
}
