//! Engine orchestration
//!
//! This module provides the public API for Synheart Correlate. It wires the
//! record store through frame building, density derivation, alignment and
//! scoring, and exposes the derived operation registry.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::align::AlignmentResolver;
use crate::config::EngineConfig;
use crate::correlation::{score, time_trend_pair};
use crate::density::DensityCalculator;
use crate::error::{ComputeError, CorrelationError, FailureKind};
use crate::frame::{FrameBuilder, WideFrame};
use crate::operations::{coerce_params, OperationRegistry};
use crate::store::RecordStore;
use crate::types::{
    ColumnKey, CorrelationMethod, CorrelationReport, CorrelationRequest, MetricSeries,
    MissingPolicy, PairwiseResult, RankedCorrelate, TimeTrendResult,
};

/// Build a wide frame from `store` with default settings.
///
/// # Arguments
/// * `store` - Record store to read from
/// * `start` / `end` - Optional inclusive date bounds
/// * `include_derived` - Add nutrient/energy density columns
pub fn build_wide_frame(
    store: &dyn RecordStore,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    include_derived: bool,
) -> Result<WideFrame, ComputeError> {
    CorrelationEngine::with_defaults(store).build_wide_frame(start, end, include_derived)
}

/// Correlate one metric against time, or two metrics against each other.
///
/// # Example
/// ```ignore
/// let report = calculate_correlation(
///     &store,
///     &"oura:total_sleep".parse()?,
///     Some(&"garmin:steps".parse()?),
///     &CorrelationRequest::default().with_shift("oura", -1),
/// )?;
/// ```
pub fn calculate_correlation(
    store: &dyn RecordStore,
    metric1: &ColumnKey,
    metric2: Option<&ColumnKey>,
    request: &CorrelationRequest,
) -> Result<CorrelationReport, CorrelationError> {
    CorrelationEngine::with_defaults(store).calculate_correlation(metric1, metric2, request)
}

/// Rank every other metric by `|r|` against `target`, keeping the first `top_n`
pub fn calculate_multiple_correlations(
    store: &dyn RecordStore,
    target: &ColumnKey,
    request: &CorrelationRequest,
    top_n: usize,
) -> Result<Vec<RankedCorrelate>, ComputeError> {
    CorrelationEngine::with_defaults(store).calculate_multiple_correlations(target, request, top_n)
}

/// Correlation engine bound to a record store.
///
/// Holds no per-request state; every call materializes its own frame.
pub struct CorrelationEngine<S> {
    store: S,
    config: EngineConfig,
    registry: Arc<OperationRegistry>,
    resolver: AlignmentResolver,
    density: DensityCalculator,
}

impl<S: RecordStore> CorrelationEngine<S> {
    /// Create an engine from explicit configuration and a shared registry
    pub fn new(store: S, config: EngineConfig, registry: Arc<OperationRegistry>) -> Self {
        let resolver = AlignmentResolver::new(config.alignment.lag_sensitive_metrics.iter());
        let density = DensityCalculator::new(config.density.energy_keywords.iter());
        Self {
            store,
            config,
            registry,
            resolver,
            density,
        }
    }

    /// Create an engine with compiled defaults and the built-in operations
    pub fn with_defaults(store: S) -> Self {
        Self::new(
            store,
            EngineConfig::default(),
            Arc::new(OperationRegistry::with_builtins()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Materialize the wide frame, optionally with density columns
    pub fn build_wide_frame(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        include_derived: bool,
    ) -> Result<WideFrame, ComputeError> {
        let mut frame = FrameBuilder::build(&self.store, start, end)?;
        if include_derived {
            let added = self.density.apply(&mut frame);
            debug!(added, "density columns derived");
        }
        Ok(frame)
    }

    /// Single entry point for both correlation modes.
    ///
    /// With `metric2 = None` the metric is correlated against whole days elapsed
    /// since its first observation. Every failure comes back as a
    /// [`CorrelationError`] value; nothing is raised past this boundary.
    pub fn calculate_correlation(
        &self,
        metric1: &ColumnKey,
        metric2: Option<&ColumnKey>,
        request: &CorrelationRequest,
    ) -> Result<CorrelationReport, CorrelationError> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "correlation",
            %request_id,
            metric1 = %metric1,
            metric2 = metric2.map(ToString::to_string).as_deref().unwrap_or("time"),
        );
        let _guard = span.enter();

        let (method, policy) = parse_request(request)?;
        let frame = self
            .build_wide_frame(request.start, request.end, request.use_density)
            .map_err(|e| {
                CorrelationError::without_data(FailureKind::Store, e.to_string(), request.min_pairs)
            })?;

        let report = self.correlate_in_frame(&frame, metric1, metric2, method, policy, request)?;
        info!(
            coefficient = report.coefficient(),
            p_value = report.p_value(),
            valid_pairs = report.stats().valid_pairs,
            "correlation computed"
        );
        Ok(report)
    }

    /// Correlate `target` against every other column, skipping pairs that fail.
    ///
    /// Results are ordered by `|coefficient|` descending and truncated to `top_n`.
    /// An unknown method or policy fails the whole call, as does a target that is
    /// absent from the frame.
    pub fn calculate_multiple_correlations(
        &self,
        target: &ColumnKey,
        request: &CorrelationRequest,
        top_n: usize,
    ) -> Result<Vec<RankedCorrelate>, ComputeError> {
        let (method, policy) = parse_request(request)?;
        let frame = self.build_wide_frame(request.start, request.end, request.use_density)?;
        if !frame.contains(target) {
            return Err(ComputeError::ColumnNotFound(target.to_string()));
        }

        let mut ranked = Vec::new();
        for candidate in frame.column_keys().filter(|k| *k != target) {
            match self.correlate_in_frame(&frame, target, Some(candidate), method, policy, request)
            {
                Ok(report) => ranked.push(RankedCorrelate {
                    metric: candidate.clone(),
                    coefficient: report.coefficient(),
                    p_value: report.p_value(),
                    valid_pairs: report.stats().valid_pairs,
                }),
                Err(e) => debug!(candidate = %candidate, reason = %e, "skipping correlate"),
            }
        }

        ranked.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));
        ranked.truncate(top_n);
        Ok(ranked)
    }

    /// Pull a single metric from the store as a series
    pub fn series(
        &self,
        key: &ColumnKey,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<MetricSeries, ComputeError> {
        let entry = self
            .store
            .catalog()?
            .into_iter()
            .find(|e| e.source == key.source && e.metric_name == key.metric_name)
            .ok_or_else(|| ComputeError::ColumnNotFound(key.to_string()))?;
        let observations = self
            .store
            .query(&entry.metric_name, &entry.source, start, end)?;
        Ok(MetricSeries::from_observations(key, &entry.unit, &observations))
    }

    /// Apply a registered operation to `series` with raw JSON parameters.
    ///
    /// Series parameters given as `source:metric_name` are loaded from the store.
    pub fn apply_operation(
        &self,
        slug: &str,
        series: &MetricSeries,
        raw_params: &Map<String, Value>,
    ) -> Result<MetricSeries, ComputeError> {
        let operation = self
            .registry
            .get(slug)
            .ok_or_else(|| ComputeError::UnknownOperation(slug.to_string()))?;
        let params = coerce_params(slug, operation.schema(), raw_params, |key| {
            self.series(key, None, None)
        })?;
        self.registry.apply(slug, series, &params)
    }

    fn correlate_in_frame(
        &self,
        frame: &WideFrame,
        metric1: &ColumnKey,
        metric2: Option<&ColumnKey>,
        method: CorrelationMethod,
        policy: MissingPolicy,
        request: &CorrelationRequest,
    ) -> Result<CorrelationReport, CorrelationError> {
        let min_pairs = request.min_pairs;

        let Some(metric2) = metric2 else {
            if !frame.contains(metric1) {
                return Err(CorrelationError::column_not_found(&metric1.to_string(), min_pairs));
            }
            let observed = frame.observed(metric1);
            let (origin, pair) =
                time_trend_pair(&metric1.to_string(), &observed, frame.row_count(), min_pairs)?;
            let stats = score(method, pair, min_pairs)?;
            return Ok(CorrelationReport::TimeTrend(TimeTrendResult {
                metric: metric1.clone(),
                origin,
                stats,
            }));
        };

        let mut pair = self.resolver.resolve(
            frame,
            metric1,
            metric2,
            &request.time_shift,
            min_pairs,
            policy,
        )?;
        let applied_shifts: BTreeMap<String, i64> = std::mem::take(&mut pair.applied_shifts);
        let stats = score(method, pair, min_pairs)?;

        Ok(CorrelationReport::Pairwise(PairwiseResult {
            metric1: metric1.clone(),
            metric2: metric2.clone(),
            missing_policy: policy,
            applied_shifts,
            stats,
        }))
    }
}

fn parse_request(
    request: &CorrelationRequest,
) -> Result<(CorrelationMethod, MissingPolicy), CorrelationError> {
    let method = request
        .method
        .parse::<CorrelationMethod>()
        .map_err(|e| CorrelationError::invalid_input(e, request.min_pairs))?;
    let policy = request
        .missing_policy
        .parse::<MissingPolicy>()
        .map_err(|e| CorrelationError::invalid_input(e, request.min_pairs))?;
    Ok((method, policy))
}
