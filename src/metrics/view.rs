use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{AggregateSnapshot, EndpointSnapshot};

/// Aggregate as presented to observers: durations in milliseconds, rates in
/// percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsView {
    pub vus: u64,
    pub rps: f64,
    /// Mean latency of the most recent sample.
    pub response_time: f64,
    /// Failure rate of the most recent sample.
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub error_rate_total: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub p90: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointView {
    pub name: String,
    pub requests: u64,
    pub failed: u64,
    pub error_rate: f64,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub p90_duration: f64,
    pub status_codes: BTreeMap<u16, u64>,
}

impl MetricsView {
    #[must_use]
    pub fn from_snapshot(snapshot: &AggregateSnapshot) -> Self {
        Self {
            vus: snapshot.vus,
            rps: from_x100(snapshot.rps_x100),
            response_time: micros_to_millis(snapshot.current_response_time_us),
            error_rate: from_x100(snapshot.current_error_rate_x100),
            avg_response_time: micros_to_millis(snapshot.avg_response_time_us),
            error_rate_total: from_x100(snapshot.error_rate_x100),
            total_requests: snapshot.total_requests,
            failed_requests: snapshot.failed_requests,
            p90: micros_to_millis(snapshot.p90_us),
            p50: micros_to_millis(snapshot.p50_us),
            p95: micros_to_millis(snapshot.p95_us),
            p99: micros_to_millis(snapshot.p99_us),
            min_response_time: micros_to_millis(snapshot.min_response_time_us),
            max_response_time: micros_to_millis(snapshot.max_response_time_us),
        }
    }
}

impl EndpointView {
    #[must_use]
    pub fn from_snapshot(endpoint: &EndpointSnapshot) -> Self {
        Self {
            name: endpoint.name.clone(),
            requests: endpoint.requests,
            failed: endpoint.failed,
            error_rate: from_x100(endpoint.error_rate_x100),
            avg_duration: micros_to_millis(endpoint.avg_duration_us),
            min_duration: micros_to_millis(endpoint.min_duration_us),
            max_duration: micros_to_millis(endpoint.max_duration_us),
            p90_duration: micros_to_millis(endpoint.p90_duration_us),
            status_codes: endpoint.status_codes.clone(),
        }
    }

    #[must_use]
    pub fn list(snapshot: &AggregateSnapshot) -> Vec<Self> {
        snapshot.endpoints.iter().map(Self::from_snapshot).collect()
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "Observers expect fractional milliseconds."
)]
#[must_use]
pub const fn micros_to_millis(value_us: u64) -> f64 {
    value_us as f64 / 1_000.0
}

#[expect(
    clippy::float_arithmetic,
    reason = "Observers expect fractional rates."
)]
#[must_use]
pub const fn from_x100(value_x100: u64) -> f64 {
    value_x100 as f64 / 100.0
}
