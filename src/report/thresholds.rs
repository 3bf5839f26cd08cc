use serde::Serialize;

use crate::domain::Thresholds;
use crate::engine::{error_rate_expression, latency_expression};
use crate::metrics::{AggregateSnapshot, from_x100, micros_to_millis};

/// Outcome of one configured threshold against the final aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdVerdict {
    pub metric: &'static str,
    pub expression: String,
    /// Milliseconds for latency, percent for failure rate.
    pub observed: f64,
    pub passed: bool,
}

/// Evaluate each configured threshold. Bounds are strict, matching the
/// engine's `<` expressions.
#[must_use]
pub fn evaluate_thresholds(
    thresholds: &Thresholds,
    snapshot: &AggregateSnapshot,
) -> Vec<ThresholdVerdict> {
    let mut verdicts = Vec::new();
    if let Some(limit_ms) = thresholds.latency_p95_ms {
        verdicts.push(ThresholdVerdict {
            metric: "http_req_duration",
            expression: latency_expression(limit_ms),
            observed: micros_to_millis(snapshot.p95_us),
            passed: snapshot.p95_us < limit_ms.saturating_mul(1_000),
        });
    }
    if let Some(limit_x100) = thresholds.error_rate_x100 {
        verdicts.push(ThresholdVerdict {
            metric: "http_req_failed",
            expression: error_rate_expression(limit_x100),
            observed: from_x100(snapshot.error_rate_x100),
            passed: snapshot.error_rate_x100 < limit_x100,
        });
    }
    verdicts
}
