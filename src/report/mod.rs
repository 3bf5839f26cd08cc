//! Final per-session reports and where they are kept.
mod json;
mod thresholds;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{SessionConfig, SessionId, SessionState};
use crate::error::{MetricsError, ReportError};
use crate::metrics::{EndpointView, MetricsView, SessionAggregate};

pub use json::JsonReportSink;
pub use thresholds::{ThresholdVerdict, evaluate_thresholds};

/// Control-API path serving the stored report for a session.
#[must_use]
pub fn report_url(session_id: &SessionId) -> String {
    format!("/api/test-report/{}", session_id)
}

/// Frozen outcome of one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub test_id: SessionId,
    pub status: SessionState,
    pub error: Option<String>,
    pub config: SessionConfig,
    pub start_time: String,
    pub end_time: String,
    pub duration_ms: i64,
    pub metrics: MetricsView,
    pub endpoints: Vec<EndpointView>,
    pub thresholds: Vec<ThresholdVerdict>,
    /// Base64 HDR histogram (V2) of all latencies in microseconds.
    pub latency_histogram: String,
}

impl FinalReport {
    /// Build a report from a frozen aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the latency histogram cannot be encoded.
    pub fn build(
        test_id: &SessionId,
        status: SessionState,
        error: Option<String>,
        config: &SessionConfig,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        aggregate: &SessionAggregate,
    ) -> Result<Self, MetricsError> {
        let snapshot = aggregate.snapshot();
        Ok(Self {
            test_id: test_id.clone(),
            status,
            error,
            config: config.clone(),
            start_time: started_at.to_rfc3339(),
            end_time: ended_at.to_rfc3339(),
            duration_ms: ended_at
                .signed_duration_since(started_at)
                .num_milliseconds()
                .max(0),
            metrics: MetricsView::from_snapshot(&snapshot),
            endpoints: EndpointView::list(&snapshot),
            thresholds: evaluate_thresholds(&config.thresholds, &snapshot),
            latency_histogram: aggregate.encode_histogram()?,
        })
    }
}

#[async_trait]
pub trait ReportSink: Send + Sync + std::fmt::Debug {
    /// Persist a final report and return the URL it is served under.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be serialized or written.
    async fn store(&self, report: &FinalReport) -> Result<String, ReportError>;

    /// Load a stored report as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing is stored for the session.
    async fn load(&self, session_id: &SessionId) -> Result<serde_json::Value, ReportError>;
}
