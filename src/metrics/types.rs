use std::collections::BTreeMap;

use serde::Serialize;

/// One decoded engine emission. Counts are deltas since the previous sample;
/// gauges are instantaneous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSample {
    pub timestamp_ms: i64,
    /// Elapsed progress in percent when the engine reports it.
    pub progress: Option<u64>,
    pub vus: Option<u64>,
    pub rps_x100: u64,
    pub response_time_us: u64,
    pub error_rate_x100: u64,
    pub endpoints: Vec<EndpointDelta>,
}

#[cfg(test)]
impl RawSample {
    #[must_use]
    pub(crate) fn request_delta(&self) -> u64 {
        self.endpoints
            .iter()
            .fold(0_u64, |acc, delta| acc.saturating_add(delta.requests))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointDelta {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub latencies_us: Vec<u64>,
    pub status_codes: BTreeMap<u16, u64>,
}

/// Point-in-time copy of a session aggregate. Latencies in microseconds,
/// rates in hundredths of a percent. `current_*` fields hold the last
/// sample's instantaneous values; the others are cumulative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
    pub sequence: u64,
    pub progress: u64,
    pub vus: u64,
    pub rps_x100: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub error_rate_x100: u64,
    pub avg_response_time_us: u64,
    pub current_response_time_us: u64,
    pub current_error_rate_x100: u64,
    pub min_response_time_us: u64,
    pub max_response_time_us: u64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub endpoints: Vec<EndpointSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub requests: u64,
    pub failed: u64,
    pub error_rate_x100: u64,
    pub avg_duration_us: u64,
    pub min_duration_us: u64,
    pub max_duration_us: u64,
    pub p90_duration_us: u64,
    pub status_codes: BTreeMap<u16, u64>,
}
