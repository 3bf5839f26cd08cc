use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::domain::{SessionConfig, SessionId, SessionState};
use crate::metrics::{AggregateSnapshot, EndpointView, MetricsView};

/// Timing and retention knobs for session workers.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Engine point batching window.
    pub sampling_interval: Duration,
    /// Allowed overrun past duration + ramp-up before the watchdog fires.
    pub completion_grace: Duration,
    /// How long a terminal session stays in the active registry.
    pub retention: Duration,
    pub history_capacity: usize,
}

/// Latest state of a session as published by its worker.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub test_id: SessionId,
    pub config: SessionConfig,
    pub state: SessionState,
    pub progress: u64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub snapshot: AggregateSnapshot,
    pub report_url: Option<String>,
}

impl SessionView {
    pub(super) fn starting(test_id: SessionId, config: SessionConfig) -> Self {
        Self {
            test_id,
            config,
            state: SessionState::Starting,
            progress: 0,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            snapshot: AggregateSnapshot::default(),
            report_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateView {
    pub metrics: MetricsView,
    pub endpoints: Vec<EndpointView>,
}

/// Control-API status body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub test_id: SessionId,
    pub status: SessionState,
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    pub config: SessionConfig,
    pub aggregate_snapshot: AggregateView,
}

impl From<&SessionView> for SessionStatus {
    fn from(view: &SessionView) -> Self {
        Self {
            test_id: view.test_id.clone(),
            status: view.state,
            progress: view.progress,
            error: view.error.clone(),
            start_time: view.started_at.to_rfc3339(),
            end_time: view.ended_at.map(|at| at.to_rfc3339()),
            report_url: view.report_url.clone(),
            config: view.config.clone(),
            aggregate_snapshot: AggregateView {
                metrics: MetricsView::from_snapshot(&view.snapshot),
                endpoints: EndpointView::list(&view.snapshot),
            },
        }
    }
}

/// One row of `test-history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub test_id: SessionId,
    pub script_id: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub status: SessionState,
    pub vus: u64,
    pub duration: u64,
    pub ramp_up: u64,
    #[serde(skip)]
    pub(super) started_at: DateTime<Utc>,
}

impl From<&SessionView> for HistoryEntry {
    fn from(view: &SessionView) -> Self {
        Self {
            test_id: view.test_id.clone(),
            script_id: view.config.script_id.clone(),
            start_time: view.started_at.to_rfc3339(),
            end_time: view.ended_at.map(|at| at.to_rfc3339()),
            status: view.state,
            vus: view.config.vus,
            duration: view.config.duration_secs,
            ramp_up: view.config.ramp_up_secs,
            started_at: view.started_at,
        }
    }
}

#[derive(Debug)]
pub(super) enum WorkerCommand {
    Stop {
        respond_to: oneshot::Sender<SessionState>,
    },
}
