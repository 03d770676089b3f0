//! Synheart Correlate - Time-series assembly and correlation engine for personal metrics
//!
//! Correlate combines sparse daily metrics from wearables, nutrition logs and
//! manual entries onto a common date axis and compares them statistically:
//! wide frame building → optional density derivation → lag alignment and
//! missing-data resolution → coefficient, significance and interpretation.
//!
//! ## Modules
//!
//! - **Correlation Engine**: pairwise, time-trend and top-N correlation over a [`RecordStore`]
//! - **Derived Operations**: registry of parameterized single-series transforms

pub mod align;
pub mod config;
pub mod correlation;
pub mod density;
pub mod error;
pub mod frame;
pub mod operations;
pub mod pipeline;
pub mod stats;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use error::{ComputeError, ConfigError, CorrelationError, FailureKind};
pub use frame::WideFrame;
pub use operations::{DerivedOperation, OperationParams, OperationRegistry};
pub use pipeline::{
    build_wide_frame, calculate_correlation, calculate_multiple_correlations, CorrelationEngine,
};
pub use store::{InMemoryStore, RecordStore};
pub use types::{
    ColumnKey, CorrelationMethod, CorrelationOutcome, CorrelationReport, CorrelationRequest,
    MetricSeries, MissingPolicy, Observation, RankedCorrelate,
};

/// Library version reported by the CLI and the C ABI
pub const CORRELATE_VERSION: &str = env!("CARGO_PKG_VERSION");
