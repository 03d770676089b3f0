use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use synheart_correlate::{
    ColumnKey, ComputeError, CorrelationEngine, CorrelationMethod, CorrelationOutcome,
    CorrelationReport, CorrelationRequest, EngineConfig, FailureKind, InMemoryStore,
    MissingPolicy, OperationRegistry,
};

const OBSERVATIONS: &str = r#"
{"source":"oura","metric_name":"total_sleep","date":"2024-01-02","value":7.0,"unit":"h"}
{"source":"oura","metric_name":"total_sleep","date":"2024-01-03","value":8.5,"unit":"h"}
{"source":"oura","metric_name":"total_sleep","date":"2024-01-04","value":6.0,"unit":"h"}
{"source":"oura","metric_name":"total_sleep","date":"2024-01-05","value":9.0,"unit":"h"}
{"source":"oura","metric_name":"readiness","date":"2024-01-02","value":70,"unit":"score"}
{"source":"oura","metric_name":"readiness","date":"2024-01-04","value":60,"unit":"score"}
{"source":"oura","metric_name":"readiness","date":"2024-01-05","value":85,"unit":"score"}
{"source":"garmin","metric_name":"steps","date":"2024-01-01","value":6000,"unit":"count"}
{"source":"garmin","metric_name":"steps","date":"2024-01-02","value":9000,"unit":"count"}
{"source":"garmin","metric_name":"steps","date":"2024-01-03","value":4000,"unit":"count"}
{"source":"garmin","metric_name":"steps","date":"2024-01-04","value":10000,"unit":"count"}
{"source":"cronometer","metric_name":"Energy","date":"2024-01-01","value":2000,"unit":"kcal"}
{"source":"cronometer","metric_name":"Energy","date":"2024-01-02","value":0,"unit":"kcal"}
{"source":"cronometer","metric_name":"Protein","date":"2024-01-01","value":100,"unit":"g"}
{"source":"cronometer","metric_name":"Protein","date":"2024-01-02","value":80,"unit":"g"}
{"source":"manual","metric_name":"mood","date":"2024-02-01","value":3,"unit":"score"}
{"source":"manual","metric_name":"mood","date":"2024-02-02","value":4,"unit":"score"}
"#;

fn engine() -> CorrelationEngine<InMemoryStore> {
    let store = InMemoryStore::from_text(OBSERVATIONS).unwrap();
    CorrelationEngine::new(
        store,
        EngineConfig::default(),
        Arc::new(OperationRegistry::with_builtins()),
    )
}

fn key(s: &str) -> ColumnKey {
    s.parse().unwrap()
}

fn d(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

#[test]
fn frame_records_use_dates_and_nulls() {
    let frame = engine().build_wide_frame(None, Some(d(1, 2)), false).unwrap();
    let records = serde_json::to_value(frame.to_records()).unwrap();

    assert_eq!(records[0]["date"], "2024-01-01");
    assert_eq!(records[0]["garmin:steps"], 6000.0);
    assert_eq!(records[0]["oura:total_sleep"], json!(null));
    assert_eq!(records[1]["cronometer:Energy"], 0.0);
    assert_eq!(records.as_array().unwrap().len(), 2);
}

#[test]
fn disjoint_dates_fail_even_with_min_pairs_one() {
    let request = CorrelationRequest::default().with_min_pairs(1);
    let err = engine()
        .calculate_correlation(&key("manual:mood"), Some(&key("garmin:steps")), &request)
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::InsufficientData);
    assert_eq!(err.valid_pairs, 0);
    assert_eq!(err.min_pairs, 1);
    assert_eq!(err.total_rows, 6);
    assert_eq!(err.missing_counts["manual:mood"], 4);
    assert_eq!(err.missing_counts["garmin:steps"], 2);
}

#[test]
fn outcome_serializes_exactly_one_branch() {
    let engine = engine();
    let ok: CorrelationOutcome = engine
        .calculate_correlation(
            &key("oura:total_sleep"),
            Some(&key("garmin:steps")),
            &CorrelationRequest::default(),
        )
        .into();
    let value = serde_json::to_value(&ok).unwrap();
    assert_eq!(value["status"], "ok");
    assert!(value.get("error").is_none());
    assert_eq!(value["result"]["metric1"]["source"], "oura");

    let failed: CorrelationOutcome = engine
        .calculate_correlation(
            &key("oura:total_sleep"),
            Some(&key("garmin:nope")),
            &CorrelationRequest::default(),
        )
        .into();
    let value = serde_json::to_value(&failed).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["error"]["kind"], "column_not_found");
    assert!(value.get("result").is_none());
}

#[test]
fn lag_shift_changes_pairing() {
    let engine = engine();
    let (sleep, steps) = (key("oura:total_sleep"), key("garmin:steps"));

    let plain = engine
        .calculate_correlation(&sleep, Some(&steps), &CorrelationRequest::default())
        .unwrap();
    let shifted = engine
        .calculate_correlation(
            &sleep,
            Some(&steps),
            &CorrelationRequest::default().with_shift("oura", -1),
        )
        .unwrap();

    // Unshifted: overlap on Jan 2..=4. Shifted: sleep moves to Jan 1..=4.
    assert_eq!(plain.stats().valid_pairs, 3);
    assert_eq!(shifted.stats().valid_pairs, 4);
    match shifted {
        CorrelationReport::Pairwise(result) => {
            assert_eq!(result.applied_shifts.get("oura:total_sleep"), Some(&-1));
            assert_eq!(result.stats.points[0].date, d(1, 1));
            assert_eq!(result.stats.points[0].y, 6000.0);
            assert_eq!(result.stats.points[0].x, 7.0);
        }
        other => panic!("expected pairwise, got {other:?}"),
    }
}

#[test]
fn readiness_is_never_shifted() {
    let request = CorrelationRequest::default()
        .with_shift("oura", -1)
        .with_min_pairs(2);
    let report = engine()
        .calculate_correlation(&key("oura:readiness"), Some(&key("garmin:steps")), &request)
        .unwrap();
    match report {
        CorrelationReport::Pairwise(result) => assert!(result.applied_shifts.is_empty()),
        other => panic!("expected pairwise, got {other:?}"),
    }
}

#[test]
fn interpolation_fills_interior_gap() {
    let request = CorrelationRequest::default().with_policy(MissingPolicy::Interpolate);
    let report = engine()
        .calculate_correlation(&key("oura:readiness"), Some(&key("oura:total_sleep")), &request)
        .unwrap();
    let stats = report.stats();

    // readiness is missing Jan 3; both columns then cover Jan 2..=5
    assert_eq!(stats.valid_pairs, 3);
    assert_eq!(stats.points.len(), 4);
    assert_eq!(stats.points[1].date, d(1, 3));
    assert_eq!(stats.points[1].x, 65.0);
    assert_eq!(stats.missing_counts["oura:readiness"], 1);
}

#[test]
fn density_column_is_missing_where_energy_is_zero() {
    let frame = engine().build_wide_frame(None, None, true).unwrap();
    let density = frame
        .column(&key("cronometer:density_Protein"))
        .expect("density column");

    assert_eq!(density[0], Some(100.0 / 2000.0 * 100.0));
    assert_eq!(density[1], None);
    assert!(!frame.contains(&key("cronometer:density_Energy")));
}

#[test]
fn spearman_and_kendall_through_the_engine() {
    let engine = engine();
    for method in [CorrelationMethod::Spearman, CorrelationMethod::Kendall] {
        let report = engine
            .calculate_correlation(
                &key("oura:total_sleep"),
                Some(&key("garmin:steps")),
                &CorrelationRequest::default().with_method(method),
            )
            .unwrap();
        assert_eq!(report.stats().method, method);
        assert!((-1.0..=1.0).contains(&report.coefficient()));
    }
}

#[test]
fn top_correlates_skip_failures() {
    let ranked = engine()
        .calculate_multiple_correlations(&key("oura:total_sleep"), &CorrelationRequest::default(), 10)
        .unwrap();
    let names: Vec<String> = ranked.iter().map(|r| r.metric.to_string()).collect();

    assert!(names.contains(&"garmin:steps".to_string()));
    assert!(names.contains(&"oura:readiness".to_string()));
    // too few overlapping rows
    assert!(!names.contains(&"manual:mood".to_string()));
    assert!(!names.contains(&"cronometer:Protein".to_string()));
    for pair in ranked.windows(2) {
        assert!(pair[0].coefficient.abs() >= pair[1].coefficient.abs());
    }
}

#[test]
fn divide_by_zero_scalar_vs_series() {
    let engine = engine();
    let protein = engine.series(&key("cronometer:Protein"), None, None).unwrap();

    let scalar = json!({"operand": "scalar", "scalar": 0});
    let err = engine
        .apply_operation("divide", &protein, scalar.as_object().unwrap())
        .unwrap_err();
    assert!(matches!(err, ComputeError::InvalidInput(_)));

    let series = json!({"operand": "series", "other": "cronometer:Energy"});
    let out = engine
        .apply_operation("divide", &protein, series.as_object().unwrap())
        .unwrap();
    assert_eq!(out.values(), vec![Some(100.0 / 2000.0), None]);
    assert_eq!(out.unit, "g/kcal");
}

#[test]
fn missing_conditional_parameter_is_raised() {
    let engine = engine();
    let steps = engine.series(&key("garmin:steps"), None, None).unwrap();
    let raw = json!({"operand": "scalar"});

    match engine.apply_operation("multiply", &steps, raw.as_object().unwrap()) {
        Err(ComputeError::ParameterSchema { operation, missing }) => {
            assert_eq!(operation, "multiply");
            assert_eq!(missing, vec!["scalar".to_string()]);
        }
        other => panic!("expected schema error, got {other:?}"),
    }
}

#[test]
fn moving_average_over_calendar_days() {
    let engine = engine();
    let readiness = engine.series(&key("oura:readiness"), None, None).unwrap();
    let raw = json!({"window": "2"});
    let out = engine
        .apply_operation("moving_average", &readiness, raw.as_object().unwrap())
        .unwrap();

    // Jan 4 has no neighbour within two days; Jan 5 averages Jan 4 and 5
    assert_eq!(out.values(), vec![Some(70.0), Some(60.0), Some(72.5)]);
}
