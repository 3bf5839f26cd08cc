use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use super::command::{ENGINE_ENV, build_command};
use super::framer::{LineFramer, MAX_LINE_BYTES};
use crate::domain::{SessionConfig, SessionId};
use crate::error::{EngineError, ParseError};

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub program: String,
    pub extra_args: Vec<String>,
    /// Wait between SIGTERM and a forced kill.
    pub kill_timeout: Duration,
    /// Bound of the per-process event channel.
    pub output_capacity: usize,
    /// Directory for per-session engine option files.
    pub scratch_dir: PathBuf,
}

/// How an engine process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with status 0 without being asked to stop.
    Clean,
    /// Non-zero exit or an unrequested signal.
    Failed { code: Option<i32> },
    /// Ended after `terminate` was requested.
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub kind: ExitKind,
    pub message: Option<String>,
}

/// Output of a supervised process, delivered in arrival order. `Exited` is
/// always last and follows end of stdout.
#[derive(Debug)]
pub enum ProcessEvent {
    Line(String),
    Discarded(ParseError),
    Exited(ExitOutcome),
}

/// Control side of one running engine process.
#[derive(Debug)]
pub struct ProcessHandle {
    stop_tx: watch::Sender<bool>,
}

impl ProcessHandle {
    /// Ask the process to exit. Repeated calls and calls after exit are no-ops.
    pub fn terminate(&self) {
        if self.stop_tx.send(true).is_err() {
            // Supervisor already finished.
        }
    }
}

/// Releases the session's process slot when the supervisor ends.
#[derive(Debug)]
struct ActiveGuard {
    active: Arc<Mutex<HashSet<SessionId>>>,
    session_id: SessionId,
}

impl ActiveGuard {
    fn claim(
        active: &Arc<Mutex<HashSet<SessionId>>>,
        session_id: &SessionId,
    ) -> Result<Self, EngineError> {
        let mut guard = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(session_id.clone()) {
            return Err(EngineError::Conflict {
                session_id: session_id.to_string(),
            });
        }
        Ok(Self {
            active: Arc::clone(active),
            session_id: session_id.clone(),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(&self.session_id);
    }
}

/// Spawns and supervises engine processes, at most one per session.
#[derive(Debug, Clone)]
pub struct EngineRunner {
    settings: Arc<RunnerSettings>,
    active: Arc<Mutex<HashSet<SessionId>>>,
}

impl EngineRunner {
    #[must_use]
    pub fn new(settings: RunnerSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Spawn the engine for `session_id` and start streaming its output.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the session already has a process, or an error
    /// when the options file cannot be written or the process cannot be
    /// spawned.
    pub async fn launch(
        &self,
        session_id: &SessionId,
        config: &SessionConfig,
        script_path: &Path,
    ) -> Result<(ProcessHandle, mpsc::Receiver<ProcessEvent>), EngineError> {
        let guard = ActiveGuard::claim(&self.active, session_id)?;
        let options_path = self
            .settings
            .scratch_dir
            .join(format!("{}_options.json", session_id));
        let command = build_command(
            &self.settings.program,
            &self.settings.extra_args,
            config,
            script_path,
            &options_path,
        );

        if let Some((path, document)) = command.options_file.as_ref() {
            tokio::fs::write(path, document)
                .await
                .map_err(|err| EngineError::WriteConfig {
                    path: path.clone(),
                    source: err,
                })?;
        }
        let options_file = command.options_file.map(|(path, _)| path);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(ENGINE_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let spawned = cmd.spawn().map_err(|err| EngineError::Spawn {
            program: command.program.clone(),
            source: err,
        });
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                remove_options_file(options_file.as_deref()).await;
                return Err(err);
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            if let Err(err) = child.start_kill() {
                warn!("Failed to kill engine without pipes: {}", err);
            }
            remove_options_file(options_file.as_deref()).await;
            return Err(EngineError::MissingPipe {
                session_id: session_id.to_string(),
                stream: "stdout/stderr",
            });
        };

        info!(
            "Engine started for test {} (pid {:?}, {} args).",
            session_id,
            child.id(),
            command.args.len()
        );

        let (events_tx, events_rx) = mpsc::channel(self.settings.output_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(supervise(Supervised {
            session_id: session_id.clone(),
            child,
            stdout,
            stderr,
            events_tx,
            stop_rx,
            kill_timeout: self.settings.kill_timeout,
            options_file,
            guard,
        }));

        Ok((ProcessHandle { stop_tx }, events_rx))
    }
}

struct Supervised {
    session_id: SessionId,
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    events_tx: mpsc::Sender<ProcessEvent>,
    stop_rx: watch::Receiver<bool>,
    kill_timeout: Duration,
    options_file: Option<PathBuf>,
    guard: ActiveGuard,
}

async fn supervise(process: Supervised) {
    let Supervised {
        session_id,
        mut child,
        mut stdout,
        stderr,
        events_tx,
        mut stop_rx,
        kill_timeout,
        options_file,
        guard,
    } = process;

    let stderr_task = tokio::spawn(drain_stderr(session_id.clone(), stderr));
    let pid = child.id();
    let mut framer = LineFramer::new(MAX_LINE_BYTES);
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    let mut stdout_open = true;
    let mut terminate_requested = false;
    let mut kill_at: Option<Instant> = None;
    let mut exit_status: Option<std::io::Result<ExitStatus>> = None;
    // Set once the engine is reaped while its stdout is still held open.
    let mut drain_at: Option<Instant> = None;

    let status = loop {
        if !stdout_open && let Some(status) = exit_status.take() {
            break status;
        }
        tokio::select! {
            read = stdout.read(&mut chunk), if stdout_open => match read {
                Ok(0) => {
                    stdout_open = false;
                    if let Some(item) = framer.finish()
                        && !forward(&events_tx, item).await
                    {
                        debug!("Event receiver for test {} is gone.", session_id);
                    }
                }
                Ok(read_bytes) => {
                    for item in framer.push(chunk.get(..read_bytes).unwrap_or_default()) {
                        if !forward(&events_tx, item).await && !terminate_requested {
                            warn!("Event receiver for test {} dropped; stopping engine.", session_id);
                            terminate_requested = true;
                            request_exit(&mut child, pid, &session_id);
                            kill_at = Instant::now().checked_add(kill_timeout);
                        }
                    }
                }
                Err(err) => {
                    warn!("Failed to read engine output for test {}: {}", session_id, err);
                    stdout_open = false;
                }
            },
            status = child.wait(), if exit_status.is_none() => {
                exit_status = Some(status);
                if stdout_open {
                    drain_at = Instant::now().checked_add(kill_timeout);
                }
            }
            _changed = stop_rx.changed(), if !terminate_requested => {
                info!("Stopping engine for test {}.", session_id);
                terminate_requested = true;
                request_exit(&mut child, pid, &session_id);
                kill_at = Instant::now().checked_add(kill_timeout);
            }
            () = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                warn!(
                    "Engine for test {} did not exit within {}ms; forcing kill.",
                    session_id,
                    kill_timeout.as_millis()
                );
                kill_at = None;
                force_kill(&mut child, pid, &session_id);
            }
            () = sleep_until(drain_at.unwrap_or_else(Instant::now)), if drain_at.is_some() => {
                warn!(
                    "Engine output for test {} stayed open {}ms after exit; closing it.",
                    session_id,
                    kill_timeout.as_millis()
                );
                drain_at = None;
                force_kill(&mut child, pid, &session_id);
                if let Some(item) = framer.finish()
                    && !forward(&events_tx, item).await
                {
                    debug!("Event receiver for test {} is gone.", session_id);
                }
                stdout_open = false;
            }
        }
    };

    let stderr_error = timeout(kill_timeout, stderr_task)
        .await
        .ok()
        .and_then(Result::ok)
        .flatten();
    let outcome = classify_exit(status, terminate_requested, stderr_error);
    info!("Engine for test {} exited: {:?}", session_id, outcome.kind);

    remove_options_file(options_file.as_deref()).await;
    drop(guard);

    if events_tx
        .send(ProcessEvent::Exited(outcome))
        .await
        .is_err()
    {
        // Worker dropped the event channel.
    }
}

async fn forward(events_tx: &mpsc::Sender<ProcessEvent>, item: Result<String, ParseError>) -> bool {
    let event = match item {
        Ok(line) => ProcessEvent::Line(line),
        Err(err) => ProcessEvent::Discarded(err),
    };
    events_tx.send(event).await.is_ok()
}

fn classify_exit(
    status: std::io::Result<ExitStatus>,
    terminate_requested: bool,
    stderr_error: Option<String>,
) -> ExitOutcome {
    match status {
        Ok(_) if terminate_requested => ExitOutcome {
            kind: ExitKind::Terminated,
            message: None,
        },
        Ok(status) if status.success() => ExitOutcome {
            kind: ExitKind::Clean,
            message: None,
        },
        Ok(status) => {
            let fallback = status.code().map_or_else(
                || "Engine terminated by signal".to_owned(),
                |code| format!("Engine exited with code {}", code),
            );
            ExitOutcome {
                kind: ExitKind::Failed {
                    code: status.code(),
                },
                message: Some(stderr_error.unwrap_or(fallback)),
            }
        }
        Err(err) => ExitOutcome {
            kind: ExitKind::Failed { code: None },
            message: Some(format!("Failed to wait for engine: {}", err)),
        },
    }
}

/// Send `signal` to the engine's process group. Returns false when nothing
/// was signalled.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: libc::c_int) -> bool {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // Safety: the engine was spawned as the leader of its own process group,
    // so a negative pgid only reaches processes it started.
    let rc = unsafe { libc::kill(pgid.saturating_neg(), signal) };
    rc == 0
}

fn request_exit(child: &mut Child, pid: Option<u32>, session_id: &SessionId) {
    #[cfg(unix)]
    if signal_group(pid, libc::SIGTERM) {
        return;
    }
    #[cfg(not(unix))]
    let _ = pid;
    if let Err(err) = child.start_kill() {
        warn!("Failed to kill engine for test {}: {}", session_id, err);
    }
}

fn force_kill(child: &mut Child, pid: Option<u32>, session_id: &SessionId) {
    #[cfg(unix)]
    if signal_group(pid, libc::SIGKILL) {
        return;
    }
    #[cfg(not(unix))]
    let _ = pid;
    if let Err(err) = child.start_kill() {
        debug!("start_kill failed for test {}: {}", session_id, err);
    }
}

async fn drain_stderr(session_id: SessionId, stderr: ChildStderr) -> Option<String> {
    let mut reader = BufReader::new(stderr);
    let mut buffer = Vec::new();
    let mut last_error = None;
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let decoded = String::from_utf8_lossy(&buffer);
                let text = decoded.trim();
                if text.is_empty() {
                    continue;
                }
                let lowered = text.to_lowercase();
                if lowered.contains("error") {
                    error!("Engine [{}]: {}", session_id, text);
                    last_error = Some(text.to_owned());
                } else if lowered.contains("warn") {
                    warn!("Engine [{}]: {}", session_id, text);
                } else {
                    info!("Engine [{}]: {}", session_id, text);
                }
            }
            Err(err) => {
                debug!("Stopped reading engine stderr for test {}: {}", session_id, err);
                break;
            }
        }
    }
    last_error
}

async fn remove_options_file(path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };
    if let Err(err) = tokio::fs::remove_file(path).await {
        debug!("Failed to remove engine options {}: {}", path.display(), err);
    }
}
