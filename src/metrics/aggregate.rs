use std::collections::BTreeMap;

use super::histogram::{HISTOGRAM_HIGHEST_US, HISTOGRAM_LOWEST_US, LatencyHistogram};
use super::types::{AggregateSnapshot, EndpointDelta, EndpointSnapshot, RawSample};
use crate::error::MetricsError;

const FULL_RATE_X100: u64 = 10_000;
const MAX_PROGRESS: u64 = 100;

#[derive(Debug, Clone)]
struct LatencyStats {
    sum_us: u128,
    count: u64,
    min_us: u64,
    max_us: u64,
    histogram: LatencyHistogram,
}

impl LatencyStats {
    fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            sum_us: 0,
            count: 0,
            min_us: u64::MAX,
            max_us: 0,
            histogram: LatencyHistogram::new()?,
        })
    }

    fn record(&mut self, latency_us: u64) {
        let value = latency_us.clamp(HISTOGRAM_LOWEST_US, HISTOGRAM_HIGHEST_US);
        self.sum_us = self.sum_us.saturating_add(u128::from(value));
        self.count = self.count.saturating_add(1);
        self.min_us = self.min_us.min(value);
        self.max_us = self.max_us.max(value);
        self.histogram.record(value);
    }

    fn mean_us(&self) -> u64 {
        self.sum_us
            .checked_div(u128::from(self.count))
            .and_then(|mean| u64::try_from(mean).ok())
            .unwrap_or(0)
    }

    const fn min_us(&self) -> u64 {
        if self.count == 0 { 0 } else { self.min_us }
    }
}

#[derive(Debug, Clone)]
struct EndpointRollup {
    requests: u64,
    failures: u64,
    latency: LatencyStats,
    status_codes: BTreeMap<u16, u64>,
}

impl EndpointRollup {
    fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            requests: 0,
            failures: 0,
            latency: LatencyStats::new()?,
            status_codes: BTreeMap::new(),
        })
    }

    fn apply(&mut self, delta: &EndpointDelta) {
        self.requests = self.requests.saturating_add(delta.requests);
        self.failures = self.failures.saturating_add(delta.failures);
        for latency in &delta.latencies_us {
            self.latency.record(*latency);
        }
        for (code, count) in &delta.status_codes {
            let slot = self.status_codes.entry(*code).or_insert(0);
            *slot = slot.saturating_add(*count);
        }
    }

    fn snapshot(&self, name: &str) -> EndpointSnapshot {
        EndpointSnapshot {
            name: name.to_owned(),
            requests: self.requests,
            failed: self.failures,
            error_rate_x100: rate_x100(self.failures, self.requests),
            avg_duration_us: self.latency.mean_us(),
            min_duration_us: self.latency.min_us(),
            max_duration_us: self.latency.max_us,
            p90_duration_us: self.latency.histogram.percentiles().p90,
            status_codes: self.status_codes.clone(),
        }
    }
}

/// Authoritative metrics state for one session. Mutated only by the
/// session's worker; totals are derived from endpoint deltas so the endpoint
/// sum always equals the global total.
#[derive(Debug, Clone)]
pub struct SessionAggregate {
    total_requests: u64,
    total_failures: u64,
    vus: u64,
    rps_x100: u64,
    current_response_time_us: u64,
    current_error_rate_x100: u64,
    progress: u64,
    folds: u64,
    latency: LatencyStats,
    endpoints: BTreeMap<String, EndpointRollup>,
    frozen: bool,
}

impl SessionAggregate {
    /// Create an empty aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the latency histogram cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            total_requests: 0,
            total_failures: 0,
            vus: 0,
            rps_x100: 0,
            current_response_time_us: 0,
            current_error_rate_x100: 0,
            progress: 0,
            folds: 0,
            latency: LatencyStats::new()?,
            endpoints: BTreeMap::new(),
            frozen: false,
        })
    }

    /// Fold one raw sample into the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `AggregateFrozen` once the session is terminal, or a histogram
    /// error if a new endpoint rollup cannot be allocated. Nothing is applied
    /// when an error is returned.
    pub fn fold(&mut self, sample: &RawSample) -> Result<(), MetricsError> {
        if self.frozen {
            return Err(MetricsError::AggregateFrozen);
        }

        for delta in &sample.endpoints {
            if !self.endpoints.contains_key(&delta.name) {
                self.endpoints
                    .insert(delta.name.clone(), EndpointRollup::new()?);
            }
        }

        for delta in &sample.endpoints {
            if let Some(rollup) = self.endpoints.get_mut(&delta.name) {
                rollup.apply(delta);
            }
            self.total_requests = self.total_requests.saturating_add(delta.requests);
            self.total_failures = self.total_failures.saturating_add(delta.failures);
            for latency in &delta.latencies_us {
                self.latency.record(*latency);
            }
        }

        if let Some(vus) = sample.vus {
            self.vus = vus;
        }
        self.rps_x100 = sample.rps_x100;
        self.current_response_time_us = sample.response_time_us;
        self.current_error_rate_x100 = sample.error_rate_x100.min(FULL_RATE_X100);
        if let Some(progress) = sample.progress {
            self.advance_progress(progress);
        }
        self.folds = self.folds.saturating_add(1);
        Ok(())
    }

    /// Raise progress (percent). Progress never moves backwards and is
    /// ignored once frozen.
    pub fn advance_progress(&mut self, progress: u64) {
        if self.frozen {
            return;
        }
        self.progress = self.progress.max(progress.min(MAX_PROGRESS));
    }

    /// Mark the aggregate terminal. Later folds are rejected.
    pub const fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        self.total_requests
    }

    #[must_use]
    pub const fn total_failures(&self) -> u64 {
        self.total_failures
    }

    #[must_use]
    pub const fn progress(&self) -> u64 {
        self.progress
    }

    /// Number of samples folded so far; used as the snapshot sequence.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.folds
    }

    /// Sum of per-endpoint request counters.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn endpoint_request_sum(&self) -> u64 {
        self.endpoints
            .values()
            .fold(0_u64, |acc, rollup| acc.saturating_add(rollup.requests))
    }

    /// Histogram counter slots held across the global and endpoint rollups.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn histogram_footprint(&self) -> usize {
        self.endpoints
            .values()
            .fold(self.latency.histogram.footprint(), |acc, rollup| {
                acc.saturating_add(rollup.latency.histogram.footprint())
            })
    }

    /// Encode the global latency histogram for reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be serialized.
    pub fn encode_histogram(&self) -> Result<String, MetricsError> {
        self.latency.histogram.encode_base64()
    }

    #[must_use]
    pub fn snapshot(&self) -> AggregateSnapshot {
        let percentiles = self.latency.histogram.percentiles();
        AggregateSnapshot {
            sequence: self.folds,
            progress: self.progress,
            vus: self.vus,
            rps_x100: self.rps_x100,
            total_requests: self.total_requests,
            failed_requests: self.total_failures,
            error_rate_x100: rate_x100(self.total_failures, self.total_requests),
            avg_response_time_us: self.latency.mean_us(),
            current_response_time_us: self.current_response_time_us,
            current_error_rate_x100: self.current_error_rate_x100,
            min_response_time_us: self.latency.min_us(),
            max_response_time_us: self.latency.max_us,
            p50_us: percentiles.p50,
            p90_us: percentiles.p90,
            p95_us: percentiles.p95,
            p99_us: percentiles.p99,
            endpoints: self
                .endpoints
                .iter()
                .map(|(name, rollup)| rollup.snapshot(name))
                .collect(),
        }
    }
}

/// Failure rate in hundredths of a percent, capped at 100%.
#[must_use]
pub(crate) fn rate_x100(failures: u64, requests: u64) -> u64 {
    failures
        .saturating_mul(FULL_RATE_X100)
        .checked_div(requests)
        .unwrap_or(0)
        .min(FULL_RATE_X100)
}
