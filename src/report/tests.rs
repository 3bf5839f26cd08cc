use super::*;
use crate::domain::{SessionConfig, SessionId, SessionState, Thresholds};
use crate::error::{AppError, AppResult, ReportError};
use crate::metrics::{EndpointDelta, RawSample, SessionAggregate};
use crate::test_support::run_async_test;

fn config() -> SessionConfig {
    SessionConfig {
        script_id: "smoke.js".to_owned(),
        vus: 4,
        duration_secs: 10,
        ramp_up_secs: 0,
        thresholds: Thresholds {
            latency_p95_ms: Some(100),
            error_rate_x100: Some(500),
        },
    }
}

fn aggregate(latency_us: u64, failures: u64) -> AppResult<SessionAggregate> {
    let mut aggregate = SessionAggregate::new()?;
    aggregate.fold(&RawSample {
        vus: Some(4),
        endpoints: vec![EndpointDelta {
            name: "home".to_owned(),
            requests: 10,
            failures,
            latencies_us: vec![latency_us; 10],
            ..EndpointDelta::default()
        }],
        ..RawSample::default()
    })?;
    aggregate.freeze();
    Ok(aggregate)
}

#[test]
fn thresholds_pass_and_fail_on_strict_bounds() -> AppResult<()> {
    let passing = evaluate_thresholds(&config().thresholds, &aggregate(50_000, 0)?.snapshot());
    if passing.len() != 2 || passing.iter().any(|verdict| !verdict.passed) {
        return Err(AppError::report(format!("Expected passes: {:?}", passing)));
    }
    let failing = evaluate_thresholds(&config().thresholds, &aggregate(250_000, 5)?.snapshot());
    if failing.iter().any(|verdict| verdict.passed) {
        return Err(AppError::report(format!("Expected failures: {:?}", failing)));
    }
    let expressions: Vec<&str> = failing.iter().map(|v| v.expression.as_str()).collect();
    if expressions != vec!["p(95)<100", "rate<0.0500"] {
        return Err(AppError::report(format!("Unexpected expressions: {:?}", expressions)));
    }
    Ok(())
}

#[test]
fn stored_report_can_be_loaded() -> AppResult<()> {
    run_async_test(async {
        let dir = tempfile::tempdir()?;
        let sink = JsonReportSink::new(dir.path().join("reports"));
        let id = SessionId::from("abc-123");
        let now = chrono::Utc::now();
        let report = FinalReport::build(
            &id,
            SessionState::Completed,
            None,
            &config(),
            now,
            now,
            &aggregate(50_000, 1)?,
        )?;
        let url = sink.store(&report).await?;
        if url != "/api/test-report/abc-123" {
            return Err(AppError::report(format!("Unexpected url {}", url)));
        }
        if !dir.path().join("reports").join("abc-123_summary.json").exists() {
            return Err(AppError::report("Summary file missing"));
        }
        let loaded = sink.load(&id).await?;
        let total = loaded
            .get("metrics")
            .and_then(|metrics| metrics.get("total_requests"))
            .and_then(serde_json::Value::as_u64);
        if total != Some(10) || loaded.get("status") != Some(&serde_json::json!("completed")) {
            return Err(AppError::report(format!("Unexpected report: {}", loaded)));
        }
        let histogram = loaded
            .get("latencyHistogram")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AppError::report("Missing histogram"))?;
        let decoded = crate::metrics::LatencyHistogram::decode_base64(histogram)?;
        if decoded.count() != 10 {
            return Err(AppError::report("Histogram lost observations"));
        }
        Ok(())
    })
}

#[test]
fn loading_unknown_or_unsafe_ids_is_not_found() -> AppResult<()> {
    run_async_test(async {
        let dir = tempfile::tempdir()?;
        let sink = JsonReportSink::new(dir.path().to_path_buf());
        for id in ["missing", "../etc", ""] {
            match sink.load(&SessionId::from(id)).await {
                Err(ReportError::NotFound { .. }) => {}
                other => {
                    return Err(AppError::report(format!(
                        "Expected NotFound for '{}', got {:?}",
                        id, other
                    )));
                }
            }
        }
        Ok(())
    })
}
