//! Operation registry

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::ComputeError;
use crate::types::MetricSeries;

use super::{
    validate_params, DerivedOperation, Divide, MovingAverage, Multiply, OperationParams,
    ParamSpec, TimeShift,
};

/// Public description of a registered operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub slug: &'static str,
    pub params: &'static [ParamSpec],
}

/// Lookup table of derived operations keyed by slug.
///
/// Built once at startup and shared read-only afterwards.
///
/// # Example
///
/// ```ignore
/// let registry = OperationRegistry::with_builtins();
/// let params = OperationParams::new().with("window", 7);
/// let smoothed = registry.apply("moving_average", &series, &params)?;
/// ```
#[derive(Default)]
pub struct OperationRegistry {
    operations: BTreeMap<&'static str, Box<dyn DerivedOperation>>,
}

impl OperationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding time_shift, multiply, divide and moving_average
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Box<dyn DerivedOperation>> = vec![
            Box::new(TimeShift),
            Box::new(Multiply),
            Box::new(Divide),
            Box::new(MovingAverage),
        ];
        for operation in builtins {
            let slug = operation.slug();
            registry.operations.insert(slug, operation);
        }
        registry
    }

    /// Add an operation; slugs must be unique
    pub fn register(&mut self, operation: Box<dyn DerivedOperation>) -> Result<(), ComputeError> {
        let slug = operation.slug();
        if self.operations.contains_key(slug) {
            return Err(ComputeError::DuplicateOperation(slug.to_string()));
        }
        tracing::debug!(slug, "registered operation");
        self.operations.insert(slug, operation);
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<&dyn DerivedOperation> {
        self.operations.get(slug).map(|op| op.as_ref())
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.operations.contains_key(slug)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn DerivedOperation> {
        self.operations.values().map(|op| op.as_ref())
    }

    /// Descriptors for every operation, ordered by slug
    pub fn describe(&self) -> Vec<OperationDescriptor> {
        self.iter()
            .map(|op| OperationDescriptor {
                name: op.name(),
                slug: op.slug(),
                params: op.schema(),
            })
            .collect()
    }

    /// Validate `params` against the operation's schema, then apply it
    pub fn apply(
        &self,
        slug: &str,
        series: &MetricSeries,
        params: &OperationParams,
    ) -> Result<MetricSeries, ComputeError> {
        let operation = self
            .get(slug)
            .ok_or_else(|| ComputeError::UnknownOperation(slug.to_string()))?;
        validate_params(slug, operation.schema(), params)?;
        operation.apply(series, params)
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}
