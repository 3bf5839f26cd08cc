use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, sleep, sleep_until};
use tracing::{debug, error, info, warn};

use super::registry::Registry;
use super::types::{HistoryEntry, SessionSettings, SessionView, WorkerCommand};
use crate::domain::{SessionConfig, SessionId, SessionState};
use crate::engine::{EngineRunner, ExitKind, ExitOutcome, OutputParser, ProcessEvent, ProcessHandle};
use crate::hub::{BroadcastHub, StatusUpdate};
use crate::metrics::{RawSample, SessionAggregate};
use crate::report::{FinalReport, ReportSink};

const PROGRESS_TICK: Duration = Duration::from_secs(1);
const MAX_CLOCK_PROGRESS: u64 = 99;

struct Termination {
    state: SessionState,
    message: Option<String>,
    waiters: Vec<oneshot::Sender<SessionState>>,
}

/// Single writer for one session: owns the engine process, the parser and
/// the aggregate, and is the only place lifecycle transitions happen.
pub(super) struct Worker {
    pub(super) session_id: SessionId,
    pub(super) config: SessionConfig,
    pub(super) script_path: PathBuf,
    pub(super) started_at: DateTime<Utc>,
    pub(super) runner: EngineRunner,
    pub(super) hub: BroadcastHub,
    pub(super) reports: Arc<dyn ReportSink>,
    pub(super) registry: Registry,
    pub(super) settings: SessionSettings,
    pub(super) view_tx: watch::Sender<SessionView>,
    pub(super) commands: mpsc::Receiver<WorkerCommand>,
    pub(super) aggregate: SessionAggregate,
    pub(super) parser: OutputParser,
}

impl Worker {
    pub(super) async fn run(mut self) {
        let launched = self
            .runner
            .launch(&self.session_id, &self.config, &self.script_path)
            .await;
        let (handle, events) = match launched {
            Ok(launched) => launched,
            Err(err) => {
                error!(
                    "Failed to launch engine for test {}: {}",
                    self.session_id, err
                );
                let state = self
                    .finish(SessionState::Failed, Some(format!("Engine launch failed: {}", err)))
                    .await;
                self.linger(state).await;
                return;
            }
        };

        self.transition(SessionState::Running);
        let termination = self.supervise(&handle, events).await;
        let state = self.finish(termination.state, termination.message).await;
        for waiter in termination.waiters {
            if waiter.send(state).is_err() {
                // Requester dropped the response channel.
            }
        }
        self.linger(state).await;
    }

    async fn supervise(
        &mut self,
        handle: &ProcessHandle,
        mut events: mpsc::Receiver<ProcessEvent>,
    ) -> Termination {
        let started = Instant::now();
        let planned = self.config.planned_duration();
        let overrun_at = planned
            .checked_add(self.settings.completion_grace)
            .and_then(|limit| started.checked_add(limit));
        let mut progress_tick = tokio::time::interval(PROGRESS_TICK);
        progress_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut engine_reports_progress = false;
        let mut stop_requested = false;
        let mut overrun = false;
        let mut commands_open = true;
        let mut waiters = Vec::new();

        let exit = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ProcessEvent::Line(line)) => {
                        if self.ingest_line(&line) {
                            engine_reports_progress = true;
                        }
                    }
                    Some(ProcessEvent::Discarded(err)) => {
                        warn!("Discarded engine output for test {}: {}", self.session_id, err);
                    }
                    Some(ProcessEvent::Exited(outcome)) => break Some(outcome),
                    None => break None,
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(WorkerCommand::Stop { respond_to }) => {
                        if !stop_requested && !overrun {
                            info!("Stop requested for test {}.", self.session_id);
                            handle.terminate();
                        }
                        stop_requested = true;
                        waiters.push(respond_to);
                    }
                    None => commands_open = false,
                },
                _ = progress_tick.tick(), if !engine_reports_progress => {
                    self.advance_clock_progress(started.elapsed(), planned);
                }
                () = sleep_until(overrun_at.unwrap_or_else(Instant::now)),
                    if overrun_at.is_some() && !overrun && !stop_requested =>
                {
                    warn!(
                        "Test {} exceeded its planned {}s run by more than {}s; terminating engine.",
                        self.session_id,
                        planned.as_secs(),
                        self.settings.completion_grace.as_secs()
                    );
                    overrun = true;
                    handle.terminate();
                }
            }
        };

        if let Some(sample) = self.parser.finish() {
            self.fold(&sample);
        }

        let (state, message) = if overrun {
            (
                SessionState::Failed,
                Some(format!(
                    "Engine overran its planned duration of {}s by more than {}s",
                    planned.as_secs(),
                    self.settings.completion_grace.as_secs()
                )),
            )
        } else if stop_requested {
            (SessionState::Stopped, None)
        } else {
            classify_exit(exit)
        };
        Termination {
            state,
            message,
            waiters,
        }
    }

    /// Returns true when the line produced a sample carrying engine progress.
    fn ingest_line(&mut self, line: &str) -> bool {
        match self.parser.parse_line(line) {
            Ok(Some(sample)) => {
                let reported = sample.progress.is_some();
                self.fold(&sample);
                reported
            }
            Ok(None) => false,
            Err(err) => {
                warn!(
                    "Dropping malformed engine output for test {}: {}",
                    self.session_id, err
                );
                false
            }
        }
    }

    fn fold(&mut self, sample: &RawSample) {
        if let Err(err) = self.aggregate.fold(sample) {
            warn!("Failed to fold sample for test {}: {}", self.session_id, err);
            return;
        }
        self.publish_snapshot();
    }

    fn advance_clock_progress(&mut self, elapsed: Duration, planned: Duration) {
        let progress = elapsed
            .as_millis()
            .saturating_mul(100)
            .checked_div(planned.as_millis())
            .and_then(|value| u64::try_from(value).ok())
            .unwrap_or(0)
            .min(MAX_CLOCK_PROGRESS);
        if progress > self.aggregate.progress() {
            self.aggregate.advance_progress(progress);
            self.publish_snapshot();
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self.aggregate.snapshot();
        self.view_tx.send_modify(|view| {
            view.progress = snapshot.progress;
            view.snapshot = snapshot.clone();
        });
        self.hub.publish(self.session_id.clone(), snapshot);
    }

    /// Check `next` against the state machine; returns the current state
    /// when the move is not allowed.
    fn check_transition(&self, next: SessionState) -> Result<(), SessionState> {
        let current = self.view_tx.borrow().state;
        if current.can_transition_to(next) {
            return Ok(());
        }
        error!(
            "Rejected transition for test {} from {} to {}.",
            self.session_id, current, next
        );
        Err(current)
    }

    fn transition(&self, state: SessionState) {
        if self.check_transition(state).is_err() {
            return;
        }
        let progress = self.aggregate.progress();
        self.view_tx.send_modify(|view| view.state = state);
        self.hub.publish_status(
            self.session_id.clone(),
            StatusUpdate {
                status: state,
                progress,
                message: None,
                report_url: None,
            },
        );
        debug!("Test {} is now {}.", self.session_id, state);
    }

    /// Freeze the aggregate, persist the report and publish the terminal state.
    async fn finish(&mut self, state: SessionState, message: Option<String>) -> SessionState {
        if let Err(current) = self.check_transition(state) {
            return current;
        }
        if state == SessionState::Completed {
            self.aggregate.advance_progress(100);
        }
        self.aggregate.freeze();
        let snapshot = self.aggregate.snapshot();
        let ended_at = Utc::now();
        let report_url = self.write_report(state, message.clone(), ended_at).await;

        self.view_tx.send_modify(|view| {
            view.state = state;
            view.progress = snapshot.progress;
            view.error.clone_from(&message);
            view.ended_at = Some(ended_at);
            view.snapshot = snapshot.clone();
            view.report_url.clone_from(&report_url);
        });
        let history = HistoryEntry::from(&*self.view_tx.borrow());
        self.registry.record_history(history);

        let progress = snapshot.progress;
        self.hub.publish(self.session_id.clone(), snapshot);
        self.hub.publish_status(
            self.session_id.clone(),
            StatusUpdate {
                status: state,
                progress,
                message: message.clone(),
                report_url,
            },
        );
        match message {
            Some(message) => warn!("Test {} {}: {}", self.session_id, state, message),
            None => info!("Test {} {}.", self.session_id, state),
        }
        state
    }

    async fn write_report(
        &self,
        state: SessionState,
        message: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Option<String> {
        let report = match FinalReport::build(
            &self.session_id,
            state,
            message,
            &self.config,
            self.started_at,
            ended_at,
            &self.aggregate,
        ) {
            Ok(report) => report,
            Err(err) => {
                warn!("Failed to build report for test {}: {}", self.session_id, err);
                return None;
            }
        };
        match self.reports.store(&report).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!("Failed to store report for test {}: {}", self.session_id, err);
                None
            }
        }
    }

    /// Keep answering commands until the retention period ends or the
    /// registry entry is dropped, then evict.
    async fn linger(&mut self, state: SessionState) {
        let retention = sleep(self.settings.retention);
        tokio::pin!(retention);
        loop {
            tokio::select! {
                () = &mut retention => break,
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Stop { respond_to }) => {
                        if respond_to.send(state).is_err() {
                            // Requester dropped the response channel.
                        }
                    }
                    None => break,
                },
            }
        }
        if self.registry.remove(&self.session_id).is_some() {
            debug!("Test {} evicted after retention.", self.session_id);
        }
        self.hub.forget(self.session_id.clone());
    }
}

fn classify_exit(exit: Option<ExitOutcome>) -> (SessionState, Option<String>) {
    match exit {
        Some(ExitOutcome {
            kind: ExitKind::Clean,
            ..
        }) => (SessionState::Completed, None),
        Some(ExitOutcome {
            kind: ExitKind::Terminated,
            ..
        }) => (SessionState::Stopped, None),
        Some(ExitOutcome {
            kind: ExitKind::Failed { code },
            message,
        }) => (
            SessionState::Failed,
            Some(message.unwrap_or_else(|| format!("Engine failed (exit code {:?})", code))),
        ),
        None => (
            SessionState::Failed,
            Some("Engine supervisor ended without an exit status".to_owned()),
        ),
    }
}
