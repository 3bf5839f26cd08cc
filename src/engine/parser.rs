use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ParseError;
use crate::metrics::{EndpointDelta, RawSample, rate_x100};

const UNKNOWN_ENDPOINT: &str = "unknown";

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    data: SnapshotData,
}

#[derive(Debug, Deserialize)]
struct SnapshotData {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    vus: Option<u64>,
    #[serde(default)]
    rps: f64,
    #[serde(default)]
    response_time: f64,
    #[serde(default)]
    error_rate: f64,
    #[serde(default)]
    endpoints: Vec<SnapshotEndpoint>,
}

#[derive(Debug, Deserialize)]
struct SnapshotEndpoint {
    name: String,
    #[serde(default)]
    requests: u64,
    #[serde(default, alias = "failed")]
    failures: u64,
    /// Individual request durations in milliseconds.
    #[serde(default)]
    durations: Vec<f64>,
    #[serde(default)]
    status_codes: BTreeMap<u16, u64>,
}

#[derive(Debug, Deserialize)]
struct PointEnvelope {
    metric: String,
    data: PointData,
}

#[derive(Debug, Deserialize)]
struct PointData {
    time: String,
    value: f64,
    #[serde(default)]
    tags: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointMetric {
    Requests,
    Failed,
    Duration,
    Vus,
}

impl PointMetric {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "http_reqs" => Some(PointMetric::Requests),
            "http_req_failed" => Some(PointMetric::Failed),
            "http_req_duration" => Some(PointMetric::Duration),
            "vus" => Some(PointMetric::Vus),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PointBatch {
    bucket: i64,
    vus: Option<u64>,
    endpoints: BTreeMap<String, EndpointDelta>,
}

impl PointBatch {
    const fn new(bucket: i64) -> Self {
        Self {
            bucket,
            vus: None,
            endpoints: BTreeMap::new(),
        }
    }

    fn endpoint(&mut self, name: String) -> &mut EndpointDelta {
        self.endpoints
            .entry(name)
            .or_insert_with_key(|key| EndpointDelta {
                name: key.clone(),
                ..EndpointDelta::default()
            })
    }

    fn into_sample(self, interval_ms: i64) -> RawSample {
        let endpoints: Vec<EndpointDelta> = self.endpoints.into_values().collect();
        let mut requests: u64 = 0;
        let mut failures: u64 = 0;
        let mut latency_sum: u128 = 0;
        let mut latency_count: u64 = 0;
        for delta in &endpoints {
            requests = requests.saturating_add(delta.requests);
            failures = failures.saturating_add(delta.failures);
            for latency in &delta.latencies_us {
                latency_sum = latency_sum.saturating_add(u128::from(*latency));
                latency_count = latency_count.saturating_add(1);
            }
        }
        let interval = u64::try_from(interval_ms).unwrap_or(1).max(1);
        RawSample {
            timestamp_ms: self.bucket.saturating_mul(interval_ms),
            progress: None,
            vus: self.vus,
            rps_x100: requests
                .saturating_mul(100_000)
                .checked_div(interval)
                .unwrap_or(0),
            response_time_us: latency_sum
                .checked_div(u128::from(latency_count))
                .and_then(|mean| u64::try_from(mean).ok())
                .unwrap_or(0),
            error_rate_x100: rate_x100(failures, requests),
            endpoints,
        }
    }
}

/// Decodes engine output lines into raw samples.
///
/// Two record shapes are understood: pre-aggregated `Snapshot` records and
/// per-request `Point` records, which are batched into one sample per
/// sampling interval.
#[derive(Debug)]
pub struct OutputParser {
    interval_ms: i64,
    pending: Option<PointBatch>,
}

impl OutputParser {
    #[must_use]
    pub fn new(sampling_interval: Duration) -> Self {
        let interval_ms = i64::try_from(sampling_interval.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);
        Self {
            interval_ms,
            pending: None,
        }
    }

    /// Parse one line of engine output.
    ///
    /// Returns `Ok(None)` for lines that carry no sample (banners, other
    /// record types, points still being batched).
    ///
    /// # Errors
    ///
    /// Returns an error when a line looks like a JSON record but is not valid
    /// JSON, or when a recognised record fails structural decoding.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<RawSample>, ParseError> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return Ok(None);
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|err| ParseError::InvalidJson { source: err })?;
        let record_type = value.get("type").and_then(Value::as_str).map(str::to_owned);
        match record_type.as_deref() {
            Some("Snapshot") => {
                let envelope: SnapshotEnvelope =
                    serde_json::from_value(value).map_err(|err| ParseError::InvalidRecord {
                        record_type: "Snapshot",
                        source: err,
                    })?;
                snapshot_sample(envelope.data).map(Some)
            }
            Some("Point") => {
                let envelope: PointEnvelope =
                    serde_json::from_value(value).map_err(|err| ParseError::InvalidRecord {
                        record_type: "Point",
                        source: err,
                    })?;
                self.absorb_point(envelope)
            }
            Some(other) => {
                debug!("Ignoring engine record of type {}", other);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Flush points still waiting for their interval to close.
    #[must_use]
    pub fn finish(&mut self) -> Option<RawSample> {
        let interval_ms = self.interval_ms;
        self.pending
            .take()
            .map(|batch| batch.into_sample(interval_ms))
    }

    fn absorb_point(&mut self, point: PointEnvelope) -> Result<Option<RawSample>, ParseError> {
        let Some(metric) = PointMetric::from_name(&point.metric) else {
            return Ok(None);
        };
        let time_ms = parse_timestamp(&point.data.time)?;
        let bucket = time_ms.div_euclid(self.interval_ms);

        let flushed = match self.pending.take() {
            Some(batch) if bucket > batch.bucket => {
                self.pending = Some(PointBatch::new(bucket));
                Some(batch.into_sample(self.interval_ms))
            }
            Some(batch) => {
                self.pending = Some(batch);
                None
            }
            None => {
                self.pending = Some(PointBatch::new(bucket));
                None
            }
        };

        if let Some(batch) = self.pending.as_mut() {
            apply_point(batch, metric, &point.data);
        }
        Ok(flushed)
    }
}

fn apply_point(batch: &mut PointBatch, metric: PointMetric, data: &PointData) {
    if metric == PointMetric::Vus {
        batch.vus = Some(whole_count(data.value));
        return;
    }
    let tags = data.tags.as_ref();
    let delta = batch.endpoint(endpoint_name(tags));
    match metric {
        PointMetric::Requests => {
            let count = whole_count(data.value);
            delta.requests = delta.requests.saturating_add(count);
            if let Some(code) = tags
                .and_then(|tags| tags.get("status"))
                .and_then(status_code)
            {
                let slot = delta.status_codes.entry(code).or_insert(0);
                *slot = slot.saturating_add(count);
            }
        }
        PointMetric::Failed => {
            delta.failures = delta.failures.saturating_add(whole_count(data.value));
        }
        PointMetric::Duration => delta.latencies_us.push(millis_to_micros(data.value)),
        PointMetric::Vus => {}
    }
}

fn endpoint_name(tags: Option<&HashMap<String, Value>>) -> String {
    tags.and_then(|tags| {
        ["name", "url"]
            .iter()
            .filter_map(|key| tags.get(*key).and_then(Value::as_str))
            .find(|value| !value.is_empty())
            .map(str::to_owned)
    })
    .unwrap_or_else(|| UNKNOWN_ENDPOINT.to_owned())
}

fn status_code(value: &Value) -> Option<u16> {
    match value {
        Value::String(text) => text.parse::<u16>().ok(),
        Value::Number(number) => number.as_u64().and_then(|code| u16::try_from(code).ok()),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_timestamp(value: &str) -> Result<i64, ParseError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|time| time.timestamp_millis())
        .map_err(|err| ParseError::InvalidTimestamp {
            value: value.to_owned(),
            source: err,
        })
}

fn snapshot_sample(data: SnapshotData) -> Result<RawSample, ParseError> {
    let timestamp_ms = match data.timestamp.as_deref() {
        Some(value) => parse_timestamp(value)?,
        None => chrono::Utc::now().timestamp_millis(),
    };
    let endpoints = data
        .endpoints
        .into_iter()
        .map(|endpoint| EndpointDelta {
            name: if endpoint.name.is_empty() {
                UNKNOWN_ENDPOINT.to_owned()
            } else {
                endpoint.name
            },
            requests: endpoint.requests,
            failures: endpoint.failures,
            latencies_us: endpoint
                .durations
                .iter()
                .map(|ms| millis_to_micros(*ms))
                .collect(),
            status_codes: endpoint.status_codes,
        })
        .collect();
    Ok(RawSample {
        timestamp_ms,
        progress: data.progress.map(whole_count),
        vus: data.vus,
        rps_x100: scaled_x100(data.rps),
        response_time_us: millis_to_micros(data.response_time),
        error_rate_x100: scaled_x100(data.error_rate),
        endpoints,
    })
}

#[expect(
    clippy::float_arithmetic,
    reason = "Engine durations are fractional milliseconds."
)]
fn millis_to_micros(ms: f64) -> u64 {
    (ms * 1_000.0).round().max(0.0) as u64
}

#[expect(
    clippy::float_arithmetic,
    reason = "Engine rates are fractional and stored in hundredths."
)]
fn scaled_x100(value: f64) -> u64 {
    (value * 100.0).round().max(0.0) as u64
}

fn whole_count(value: f64) -> u64 {
    value.round().max(0.0) as u64
}
