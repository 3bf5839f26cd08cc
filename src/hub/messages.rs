use serde::Serialize;

use crate::domain::{SessionId, SessionState};
use crate::metrics::{AggregateSnapshot, EndpointView, MetricsView};

/// Event pushed to streaming subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    MetricsUpdate(MetricsUpdate),
    TestStatus(StatusEvent),
}

impl HubEvent {
    #[must_use]
    pub const fn test_id(&self) -> &SessionId {
        match self {
            HubEvent::MetricsUpdate(update) => &update.test_id,
            HubEvent::TestStatus(status) => &status.test_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsUpdate {
    #[serde(rename = "testId")]
    pub test_id: SessionId,
    /// Per-session publish counter; never decreases for a subscriber.
    pub sequence: u64,
    pub progress: u64,
    pub metrics: MetricsView,
    pub endpoints: Vec<EndpointView>,
}

impl MetricsUpdate {
    #[must_use]
    pub fn new(test_id: SessionId, sequence: u64, snapshot: &AggregateSnapshot) -> Self {
        Self {
            test_id,
            sequence,
            progress: snapshot.progress,
            metrics: MetricsView::from_snapshot(snapshot),
            endpoints: EndpointView::list(snapshot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    #[serde(rename = "testId")]
    pub test_id: SessionId,
    pub status: SessionState,
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

/// Lifecycle change reported by a session worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: SessionState,
    pub progress: u64,
    pub message: Option<String>,
    pub report_url: Option<String>,
}
