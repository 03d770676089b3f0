//! FFI bindings for Synheart Correlate
//!
//! This module provides C-compatible functions for calling the engine from other
//! languages. All functions take and return JSON as C strings (null-terminated).
//! Returned strings are allocated here and must be freed by the caller using
//! `correlate_free_string`.
//!
//! Observations are passed as a JSON array or NDJSON of flat records:
//! `{"source", "metric_name", "date", "value", "unit"}`.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::{Arc, OnceLock};

use crate::config::EngineConfig;
use crate::error::{ComputeError, CorrelationError};
use crate::operations::OperationRegistry;
use crate::pipeline::CorrelationEngine;
use crate::store::InMemoryStore;
use crate::types::{ColumnKey, CorrelationOutcome, CorrelationRequest};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Registry shared by every call in the process
fn registry() -> Arc<OperationRegistry> {
    static REGISTRY: OnceLock<Arc<OperationRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Arc::new(OperationRegistry::with_builtins()))
        .clone()
}

/// Compiled defaults with `CORRELATE_*` overrides.
///
/// Not validated here: a bad method or policy name only fails the calls that
/// fall back to it, and is reported through the correlation outcome.
fn env_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.apply_env_overrides();
    config
}

fn engine(
    observations: &str,
    config: EngineConfig,
) -> Result<CorrelationEngine<InMemoryStore>, ComputeError> {
    let store = InMemoryStore::from_text(observations)?;
    Ok(CorrelationEngine::new(store, config, registry()))
}

fn parse_key(reference: &str) -> Result<ColumnKey, ComputeError> {
    reference.parse().map_err(ComputeError::InvalidInput)
}

/// Run `call` with both string arguments decoded, storing any error for `correlate_last_error`
unsafe fn with_json_args<F>(
    observations: *const c_char,
    request: *const c_char,
    call: F,
) -> *mut c_char
where
    F: FnOnce(&str, &str) -> Result<String, ComputeError>,
{
    clear_last_error();

    let observations = match cstr_to_string(observations) {
        Some(s) => s,
        None => {
            set_last_error("Invalid observations string pointer");
            return ptr::null_mut();
        }
    };

    let request = match cstr_to_string(request) {
        Some(s) => s,
        None => {
            set_last_error("Invalid request string pointer");
            return ptr::null_mut();
        }
    };

    match call(&observations, &request) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Request fields a caller may leave out; absent ones come from the engine config
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequestFields {
    method: Option<String>,
    min_pairs: Option<usize>,
    missing_policy: Option<String>,
    time_shift: BTreeMap<String, i64>,
    use_density: Option<bool>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl RequestFields {
    fn over(self, mut request: CorrelationRequest) -> CorrelationRequest {
        if let Some(method) = self.method {
            request.method = method;
        }
        if let Some(min_pairs) = self.min_pairs {
            request.min_pairs = min_pairs;
        }
        if let Some(policy) = self.missing_policy {
            request.missing_policy = policy;
        }
        request.time_shift.extend(self.time_shift);
        if let Some(use_density) = self.use_density {
            request.use_density = use_density;
        }
        request.start = self.start.or(request.start);
        request.end = self.end.or(request.end);
        request
    }
}

#[derive(Debug, Deserialize)]
struct PairCall {
    metric1: String,
    #[serde(default)]
    metric2: Option<String>,
    #[serde(flatten)]
    request: RequestFields,
}

#[derive(Debug, Deserialize)]
struct TopCall {
    target: String,
    #[serde(default)]
    top_n: Option<usize>,
    #[serde(flatten)]
    request: RequestFields,
}

fn pair(observations: &str, request: &str, config: EngineConfig) -> Result<String, ComputeError> {
    let call: PairCall = serde_json::from_str(request)?;
    let metric1 = parse_key(&call.metric1)?;
    let metric2 = call.metric2.as_deref().map(parse_key).transpose()?;
    let request = call.request.over(config.default_request());

    let outcome: CorrelationOutcome = match engine(observations, config) {
        Ok(engine) => engine
            .calculate_correlation(&metric1, metric2.as_ref(), &request)
            .into(),
        Err(e) => CorrelationOutcome::Error {
            error: CorrelationError::invalid_input(e.to_string(), request.min_pairs),
        },
    };
    Ok(serde_json::to_string(&outcome)?)
}

fn top(observations: &str, request: &str, config: EngineConfig) -> Result<String, ComputeError> {
    let call: TopCall = serde_json::from_str(request)?;
    let target = parse_key(&call.target)?;
    let top_n = call.top_n.unwrap_or(config.correlation.top_n);
    let request = call.request.over(config.default_request());
    let engine = engine(observations, config)?;
    let ranked = engine.calculate_multiple_correlations(&target, &request, top_n)?;
    Ok(serde_json::to_string(&ranked)?)
}

#[derive(Debug, Deserialize)]
struct ApplyCall {
    operation: String,
    metric: String,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    start: Option<NaiveDate>,
    #[serde(default)]
    end: Option<NaiveDate>,
}

// ============================================================================
// Correlation API
// ============================================================================

/// Correlate one metric against time, or two metrics against each other.
///
/// `request` is a JSON object with `metric1`, optional `metric2` (both as
/// `source:metric_name`) and any correlation request fields. Fields left out
/// take the `CORRELATE_*` environment defaults. The result is a
/// JSON object tagged by `status`: `ok` with a `result`, or `error` with a
/// structured `error`. Insufficient data is therefore not a NULL return.
///
/// # Safety
/// - `observations` and `request` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `correlate_free_string`.
/// - Returns NULL only when the arguments cannot be decoded; call
///   `correlate_last_error` to get the message.
#[no_mangle]
pub unsafe extern "C" fn correlate_pair_json(
    observations: *const c_char,
    request: *const c_char,
) -> *mut c_char {
    with_json_args(observations, request, |observations, request| {
        pair(observations, request, env_config())
    })
}

/// Rank every other metric against `target`.
///
/// `request` is a JSON object with `target`, optional `top_n` and any correlation
/// request fields. Returns a JSON array of ranked correlates.
///
/// # Safety
/// - `observations` and `request` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `correlate_free_string`.
/// - Returns NULL on error; call `correlate_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn correlate_top_json(
    observations: *const c_char,
    request: *const c_char,
) -> *mut c_char {
    with_json_args(observations, request, |observations, request| {
        top(observations, request, env_config())
    })
}

// ============================================================================
// Derived Operation API
// ============================================================================

/// Apply a registered operation to one metric.
///
/// `request` is a JSON object with `operation` (slug), `metric`
/// (`source:metric_name`), `params` and optional `start`/`end`. Returns the
/// derived series as JSON.
///
/// # Safety
/// - `observations` and `request` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `correlate_free_string`.
/// - Returns NULL on error; call `correlate_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn correlate_apply_json(
    observations: *const c_char,
    request: *const c_char,
) -> *mut c_char {
    with_json_args(observations, request, |observations, request| {
        let call: ApplyCall = serde_json::from_str(request)?;
        let key = parse_key(&call.metric)?;
        let engine = engine(observations, env_config())?;
        let series = engine.series(&key, call.start, call.end)?;
        let derived = engine.apply_operation(&call.operation, &series, &call.params)?;
        Ok(serde_json::to_string(&derived)?)
    })
}

/// List registered operations and their parameter schemas as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `correlate_free_string`.
/// - Returns NULL on error; call `correlate_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn correlate_operations_json() -> *mut c_char {
    clear_last_error();
    match serde_json::to_string(&registry().describe()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by a `correlate_*` function.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a `correlate_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn correlate_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next `correlate_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn correlate_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn correlate_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
