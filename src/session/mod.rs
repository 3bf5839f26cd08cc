//! Session lifecycle: validation, registry, per-session workers, history.
mod registry;
mod types;
mod worker;


use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::domain::{SessionConfig, SessionId, SessionState, TestRequest};
use crate::engine::{EngineRunner, OutputParser};
use crate::error::{ReportError, SessionError};
use crate::hub::{BroadcastHub, StatusUpdate};
use crate::metrics::SessionAggregate;
use crate::report::ReportSink;
use crate::scripts::ScriptStore;

use registry::{Registry, SessionEntry};
pub use types::{
    AggregateView, HistoryEntry, SessionSettings, SessionStatus, SessionView,
};
use types::WorkerCommand;
use worker::Worker;

const WORKER_COMMAND_CAPACITY: usize = 16;

#[derive(Debug)]
struct ManagerInner {
    registry: Registry,
    runner: EngineRunner,
    scripts: Arc<dyn ScriptStore>,
    reports: Arc<dyn ReportSink>,
    hub: BroadcastHub,
    settings: SessionSettings,
}

/// Entry point for starting, stopping and inspecting test sessions.
#[derive(Debug, Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        runner: EngineRunner,
        scripts: Arc<dyn ScriptStore>,
        reports: Arc<dyn ReportSink>,
        hub: BroadcastHub,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: Registry::new(settings.history_capacity),
                runner,
                scripts,
                reports,
                hub,
                settings,
            }),
        }
    }

    #[must_use]
    pub fn hub(&self) -> &BroadcastHub {
        &self.inner.hub
    }

    /// Validate the request, resolve its script and start a worker.
    ///
    /// Launch failures after this returns are reported through the
    /// session's status, not here.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for out-of-range parameters and
    /// `ScriptNotFound` when the script cannot be resolved.
    pub async fn start(&self, request: &TestRequest) -> Result<SessionId, SessionError> {
        let config = SessionConfig::from_request(request)?;
        let script = self
            .inner
            .scripts
            .resolve(&config.script_id)
            .await
            .map_err(|err| {
                info!("Rejecting start: {}", err);
                SessionError::ScriptNotFound {
                    script_id: config.script_id.clone(),
                }
            })?;
        let aggregate = SessionAggregate::new()?;

        let session_id = SessionId::generate();
        let view = SessionView::starting(session_id.clone(), config.clone());
        let started_at = view.started_at;
        let (view_tx, view_rx) = watch::channel(view);
        let (command_tx, command_rx) = mpsc::channel(WORKER_COMMAND_CAPACITY);
        if !self.inner.registry.insert(
            session_id.clone(),
            SessionEntry {
                command_tx,
                view_rx,
            },
        ) {
            return Err(SessionError::Conflict {
                session_id: session_id.to_string(),
            });
        }

        info!(
            "Starting test {} (script {}, {} vus, {}s, ramp-up {}s).",
            session_id, config.script_id, config.vus, config.duration_secs, config.ramp_up_secs
        );
        self.inner.hub.publish_status(
            session_id.clone(),
            StatusUpdate {
                status: SessionState::Starting,
                progress: 0,
                message: None,
                report_url: None,
            },
        );

        let worker = Worker {
            session_id: session_id.clone(),
            config,
            script_path: script.executable_path,
            started_at,
            runner: self.inner.runner.clone(),
            hub: self.inner.hub.clone(),
            reports: Arc::clone(&self.inner.reports),
            registry: self.inner.registry.clone(),
            settings: self.inner.settings.clone(),
            view_tx,
            commands: command_rx,
            aggregate,
            parser: OutputParser::new(self.inner.settings.sampling_interval),
        };
        tokio::spawn(worker.run());
        Ok(session_id)
    }

    /// Stop a session. Stopping a terminal session is a no-op that reports
    /// its final state.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `WorkerUnavailable` if the
    /// worker went away before answering.
    pub async fn stop(&self, session_id: &SessionId) -> Result<SessionState, SessionError> {
        let entry = self.entry(session_id)?;
        let current = entry.view().state;
        if current.is_terminal() {
            return Ok(current);
        }
        let (respond_to, response) = oneshot::channel();
        if entry
            .command_tx
            .send(WorkerCommand::Stop { respond_to })
            .await
            .is_err()
        {
            return Self::settled_state(&entry, session_id);
        }
        match response.await {
            Ok(state) => Ok(state),
            Err(_closed) => Self::settled_state(&entry, session_id),
        }
    }

    /// Current view of a session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or evicted ids.
    pub fn status(&self, session_id: &SessionId) -> Result<SessionView, SessionError> {
        Ok(self.entry(session_id)?.view())
    }

    /// Stop the session if it is still active and evict it immediately.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn dismiss(&self, session_id: &SessionId) -> Result<SessionState, SessionError> {
        let state = self.stop(session_id).await?;
        if self.inner.registry.remove(session_id).is_some() {
            info!("Test {} dismissed.", session_id);
        }
        Ok(state)
    }

    /// Finished sessions merged with active ones, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        let mut entries = self.inner.registry.history();
        for view in self.inner.registry.views() {
            if !view.state.is_terminal() {
                entries.push(HistoryEntry::from(&view));
            }
        }
        entries.sort_by(|left, right| right.started_at.cmp(&left.started_at));
        entries
    }

    /// Number of sessions not yet in a terminal state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .registry
            .views()
            .iter()
            .filter(|view| !view.state.is_terminal())
            .count()
    }

    /// Stored final report for a session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no report was written for the id.
    pub async fn report(&self, session_id: &SessionId) -> Result<serde_json::Value, ReportError> {
        self.inner.reports.load(session_id).await
    }

    /// Stop every active session, used during process shutdown.
    pub async fn stop_all(&self) {
        let active: Vec<SessionId> = self
            .inner
            .registry
            .views()
            .into_iter()
            .filter(|view| !view.state.is_terminal())
            .map(|view| view.test_id)
            .collect();
        if active.is_empty() {
            return;
        }
        info!("Stopping {} active test(s).", active.len());
        let results = join_all(active.iter().map(|session_id| self.stop(session_id))).await;
        for (session_id, result) in active.iter().zip(results) {
            if let Err(err) = result {
                warn!("Failed to stop test {}: {}", session_id, err);
            }
        }
    }

    fn entry(&self, session_id: &SessionId) -> Result<SessionEntry, SessionError> {
        self.inner
            .registry
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    fn settled_state(
        entry: &SessionEntry,
        session_id: &SessionId,
    ) -> Result<SessionState, SessionError> {
        let state = entry.view().state;
        if state.is_terminal() {
            Ok(state)
        } else {
            Err(SessionError::WorkerUnavailable {
                session_id: session_id.to_string(),
            })
        }
    }
}
