use super::*;
use crate::domain::{SessionConfig, Thresholds};
use crate::error::{AppError, AppResult, EngineError, ParseError};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

fn config(vus: u64, duration_secs: u64, ramp_up_secs: u64) -> SessionConfig {
    SessionConfig {
        script_id: "smoke.js".to_owned(),
        vus,
        duration_secs,
        ramp_up_secs,
        thresholds: Thresholds::default(),
    }
}

fn args_of(command: &EngineCommand) -> Vec<String> {
    command
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn framer_joins_lines_split_across_chunks() -> AppResult<()> {
    let mut framer = LineFramer::new(1024);
    let first = framer.push(b"{\"a\":");
    let second = framer.push(b"1}\r\nbanner\n\npartial");
    if !first.is_empty() {
        return Err(AppError::engine("No line should complete in the first chunk"));
    }
    let lines: Vec<String> = second.into_iter().collect::<Result<_, ParseError>>()?;
    if lines != vec!["{\"a\":1}".to_owned(), "banner".to_owned()] {
        return Err(AppError::engine(format!("Unexpected lines: {:?}", lines)));
    }
    match framer.finish() {
        Some(Ok(tail)) if tail == "partial" => Ok(()),
        other => Err(AppError::engine(format!("Unexpected tail: {:?}", other))),
    }
}

#[test]
fn framer_discards_oversized_lines() -> AppResult<()> {
    let mut framer = LineFramer::new(8);
    let mut results = framer.push(b"0123456789");
    results.extend(framer.push(b"abc\nok\n"));
    match results.as_slice() {
        [Err(ParseError::LineTooLong { max_bytes: 8 }), Ok(line)] if line == "ok" => Ok(()),
        other => Err(AppError::engine(format!("Unexpected framing: {:?}", other))),
    }
}

#[test]
fn parser_ignores_banners_and_other_records() -> AppResult<()> {
    let mut parser = OutputParser::new(Duration::from_secs(1));
    for line in [
        "          /\\      |‾‾| /‾‾/   /‾‾/",
        "running (0m01.0s), 1/1 VUs",
        r#"{"type":"Metric","metric":"http_reqs","data":{"name":"http_reqs","type":"counter"}}"#,
        "",
    ] {
        if parser.parse_line(line)?.is_some() {
            return Err(AppError::engine(format!("Line produced a sample: {}", line)));
        }
    }
    Ok(())
}

#[test]
fn parser_reports_malformed_records() -> AppResult<()> {
    let mut parser = OutputParser::new(Duration::from_secs(1));
    match parser.parse_line("{\"type\":\"Snapshot\",") {
        Err(ParseError::InvalidJson { .. }) => {}
        other => return Err(AppError::engine(format!("Expected InvalidJson, got {:?}", other))),
    }
    match parser.parse_line(r#"{"type":"Snapshot","data":{"endpoints":"nope"}}"#) {
        Err(ParseError::InvalidRecord {
            record_type: "Snapshot",
            ..
        }) => {}
        other => {
            return Err(AppError::engine(format!(
                "Expected InvalidRecord, got {:?}",
                other
            )));
        }
    }
    let sample = parser.parse_line(&crate::test_support::snapshot_line(10, 4, 1))?;
    match sample {
        Some(sample) if sample.request_delta() == 4 => Ok(()),
        other => Err(AppError::engine(format!("Parser did not recover: {:?}", other))),
    }
}

#[test]
fn parser_decodes_snapshot_records() -> AppResult<()> {
    let mut parser = OutputParser::new(Duration::from_secs(1));
    let line = r#"{"type":"Snapshot","data":{"timestamp":"2024-05-01T10:00:00Z","progress":42.4,"vus":7,"rps":12.5,"response_time":1.5,"error_rate":2.25,"endpoints":[{"name":"login","requests":3,"failed":1,"durations":[1.0,2.0,1.5],"status_codes":{"200":2,"500":1}}]}}"#;
    let Some(sample) = parser.parse_line(line)? else {
        return Err(AppError::engine("Snapshot should produce a sample"));
    };
    let endpoint = sample
        .endpoints
        .first()
        .ok_or_else(|| AppError::engine("Missing endpoint"))?;
    if sample.progress != Some(42)
        || sample.vus != Some(7)
        || sample.rps_x100 != 1_250
        || sample.response_time_us != 1_500
        || sample.error_rate_x100 != 225
        || sample.timestamp_ms != 1_714_557_600_000
    {
        return Err(AppError::engine(format!("Unexpected sample: {:?}", sample)));
    }
    if endpoint.failures != 1
        || endpoint.latencies_us != vec![1_000, 2_000, 1_500]
        || endpoint.status_codes.get(&500) != Some(&1)
    {
        return Err(AppError::engine(format!("Unexpected endpoint: {:?}", endpoint)));
    }
    Ok(())
}

fn point(metric: &str, time: &str, value: f64, tags: &str) -> String {
    format!(
        r#"{{"type":"Point","metric":"{}","data":{{"time":"{}","value":{},"tags":{}}}}}"#,
        metric, time, value, tags
    )
}

#[test]
fn parser_batches_points_per_interval() -> AppResult<()> {
    let mut parser = OutputParser::new(Duration::from_secs(1));
    let named = r#"{"name":"login","url":"http://t/login","status":"200"}"#;
    let url_only = r#"{"url":"http://t/search","status":"503"}"#;
    let lines = [
        point("vus", "2024-05-01T10:00:00.100Z", 5.0, "null"),
        point("http_reqs", "2024-05-01T10:00:00.200Z", 1.0, named),
        point("http_req_duration", "2024-05-01T10:00:00.200Z", 12.5, named),
        point("http_req_failed", "2024-05-01T10:00:00.200Z", 0.0, named),
        point("http_reqs", "2024-05-01T10:00:00.300Z", 1.0, url_only),
        point("http_req_failed", "2024-05-01T10:00:00.300Z", 1.0, url_only),
        point("iterations", "2024-05-01T10:00:00.400Z", 1.0, "{}"),
    ];
    for line in &lines {
        if parser.parse_line(line)?.is_some() {
            return Err(AppError::engine("Batch flushed before interval closed"));
        }
    }

    let next = point("http_reqs", "2024-05-01T10:00:01.050Z", 1.0, "{}");
    let Some(sample) = parser.parse_line(&next)? else {
        return Err(AppError::engine("Crossing the interval should flush"));
    };
    if sample.vus != Some(5) || sample.request_delta() != 2 || sample.error_rate_x100 != 5_000 {
        return Err(AppError::engine(format!("Unexpected batch: {:?}", sample)));
    }
    let names: Vec<&str> = sample.endpoints.iter().map(|e| e.name.as_str()).collect();
    if names != vec!["http://t/search", "login"] {
        return Err(AppError::engine(format!("Unexpected endpoints: {:?}", names)));
    }

    match parser.finish() {
        Some(tail) if tail.endpoints.iter().any(|e| e.name == "unknown") => Ok(()),
        other => Err(AppError::engine(format!("Unexpected tail batch: {:?}", other))),
    }
}

#[test]
fn command_uses_fixed_vus_without_ramp() -> AppResult<()> {
    let command = build_command(
        "k6",
        &["--quiet".to_owned()],
        &config(10, 30, 0),
        Path::new("/scripts/a.js"),
        Path::new("/tmp/opts.json"),
    );
    let args = args_of(&command);
    let expected = vec![
        "run", "--out", "json=-", "--quiet", "--vus", "10", "--duration", "30s", "/scripts/a.js",
    ];
    if args != expected || command.options_file.is_some() {
        return Err(AppError::engine(format!("Unexpected args: {:?}", args)));
    }
    Ok(())
}

#[test]
fn command_uses_stages_and_thresholds() -> AppResult<()> {
    let mut session = config(8, 60, 15);
    session.thresholds = Thresholds {
        latency_p95_ms: Some(500),
        error_rate_x100: Some(125),
    };
    let command = build_command(
        "k6",
        &[],
        &session,
        Path::new("/scripts/a.js"),
        Path::new("/tmp/opts.json"),
    );
    let args = args_of(&command);
    let expected = vec![
        "run",
        "--out",
        "json=-",
        "--stage",
        "0s:0",
        "--stage",
        "15s:8",
        "--stage",
        "60s:8",
        "--config",
        "/tmp/opts.json",
        "/scripts/a.js",
    ];
    if args != expected {
        return Err(AppError::engine(format!("Unexpected args: {:?}", args)));
    }
    let Some((path, document)) = command.options_file else {
        return Err(AppError::engine("Thresholds should produce an options file"));
    };
    let parsed: serde_json::Value = serde_json::from_str(&document)?;
    let expected_doc = serde_json::json!({
        "thresholds": {
            "http_req_duration": ["p(95)<500"],
            "http_req_failed": ["rate<0.0125"]
        }
    });
    if parsed != expected_doc || path != Path::new("/tmp/opts.json") {
        return Err(AppError::engine(format!("Unexpected options: {}", document)));
    }
    if command.args.last() != Some(&OsString::from("/scripts/a.js")) {
        return Err(AppError::engine("Script path must be last"));
    }
    Ok(())
}

#[cfg(unix)]
mod process {
    use super::*;
    use crate::domain::SessionId;
    use crate::test_support::{run_async_test, snapshot_line, write_fake_engine};
    use tokio::sync::mpsc;

    fn runner(program: &Path, scratch: &Path) -> EngineRunner {
        EngineRunner::new(RunnerSettings {
            program: program.to_string_lossy().into_owned(),
            extra_args: Vec::new(),
            kill_timeout: Duration::from_millis(500),
            output_capacity: 4,
            scratch_dir: scratch.to_path_buf(),
        })
    }

    async fn collect(mut events: mpsc::Receiver<ProcessEvent>) -> AppResult<(Vec<String>, ExitOutcome)> {
        let mut lines = Vec::new();
        let deadline = tokio::time::Instant::now()
            .checked_add(Duration::from_secs(10))
            .ok_or_else(|| AppError::engine("deadline overflow"))?;
        loop {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .map_err(|_elapsed| AppError::engine("Timed out waiting for engine events"))?;
            match event {
                Some(ProcessEvent::Line(line)) => lines.push(line),
                Some(ProcessEvent::Discarded(err)) => {
                    return Err(AppError::engine(format!("Unexpected discard: {}", err)));
                }
                Some(ProcessEvent::Exited(outcome)) => return Ok((lines, outcome)),
                None => return Err(AppError::engine("Channel closed without exit event")),
            }
        }
    }

    #[test]
    fn clean_exit_delivers_all_lines_before_exit() -> AppResult<()> {
        run_async_test(async {
            let dir = tempfile::tempdir()?;
            let body = format!(
                "echo 'banner'\necho '{}'\necho '{}'\nexit 0",
                snapshot_line(50, 2, 0),
                snapshot_line(100, 3, 0)
            );
            let engine = write_fake_engine(dir.path(), "engine.sh", &body)?;
            let runner = runner(&engine, dir.path());
            let (_handle, events) = runner
                .launch(
                    &SessionId::from("clean"),
                    &config(1, 1, 0),
                    &dir.path().join("a.js"),
                )
                .await?;
            let (lines, outcome) = collect(events).await?;
            if lines.len() != 3 || outcome.kind != ExitKind::Clean {
                return Err(AppError::engine(format!(
                    "Unexpected result: {:?} {:?}",
                    lines, outcome
                )));
            }
            Ok(())
        })
    }

    #[test]
    fn non_zero_exit_reports_stderr_error() -> AppResult<()> {
        run_async_test(async {
            let dir = tempfile::tempdir()?;
            let body = "echo 'level=error msg=\"script exploded\"' >&2\nexit 107";
            let engine = write_fake_engine(dir.path(), "engine.sh", body)?;
            let runner = runner(&engine, dir.path());
            let (_handle, events) = runner
                .launch(
                    &SessionId::from("broken"),
                    &config(1, 1, 0),
                    &dir.path().join("a.js"),
                )
                .await?;
            let (_lines, outcome) = collect(events).await?;
            match (&outcome.kind, outcome.message.as_deref()) {
                (ExitKind::Failed { code: Some(107) }, Some(message))
                    if message.contains("script exploded") =>
                {
                    Ok(())
                }
                _ => Err(AppError::engine(format!("Unexpected outcome: {:?}", outcome))),
            }
        })
    }

    #[test]
    fn terminate_stops_long_running_engine() -> AppResult<()> {
        run_async_test(async {
            let dir = tempfile::tempdir()?;
            let engine = write_fake_engine(dir.path(), "engine.sh", "echo started\nexec sleep 30")?;
            let runner = runner(&engine, dir.path());
            let (handle, mut events) = runner
                .launch(
                    &SessionId::from("long"),
                    &config(1, 30, 0),
                    &dir.path().join("a.js"),
                )
                .await?;
            match events.recv().await {
                Some(ProcessEvent::Line(line)) if line == "started" => {}
                other => return Err(AppError::engine(format!("Unexpected event: {:?}", other))),
            }
            handle.terminate();
            handle.terminate();
            let (_lines, outcome) = collect(events).await?;
            if outcome.kind != ExitKind::Terminated {
                return Err(AppError::engine(format!("Unexpected outcome: {:?}", outcome)));
            }
            handle.terminate();
            Ok(())
        })
    }

    #[test]
    fn second_launch_for_same_session_conflicts() -> AppResult<()> {
        run_async_test(async {
            let dir = tempfile::tempdir()?;
            let engine = write_fake_engine(dir.path(), "engine.sh", "exec sleep 30")?;
            let runner = runner(&engine, dir.path());
            let id = SessionId::from("dup");
            let (handle, events) = runner
                .launch(&id, &config(1, 30, 0), &dir.path().join("a.js"))
                .await?;
            let second = runner
                .launch(&id, &config(1, 30, 0), &dir.path().join("a.js"))
                .await;
            if !matches!(second, Err(EngineError::Conflict { .. })) {
                return Err(AppError::engine("Expected Conflict on second launch"));
            }
            handle.terminate();
            let (_lines, _outcome) = collect(events).await?;
            let (again, events) = runner
                .launch(&id, &config(1, 30, 0), &dir.path().join("a.js"))
                .await?;
            again.terminate();
            let (_lines, _outcome) = collect(events).await?;
            Ok(())
        })
    }

    #[test]
    fn missing_program_fails_to_spawn() -> AppResult<()> {
        run_async_test(async {
            let dir = tempfile::tempdir()?;
            let runner = runner(&dir.path().join("no-such-engine"), dir.path());
            match runner
                .launch(
                    &SessionId::from("missing"),
                    &config(1, 1, 0),
                    &dir.path().join("a.js"),
                )
                .await
            {
                Err(EngineError::Spawn { .. }) => {}
                other => {
                    return Err(AppError::engine(format!(
                        "Expected Spawn error, got {:?}",
                        other.map(|_launched| ())
                    )));
                }
            }
            write_fake_engine(dir.path(), "no-such-engine", "exit 0")?;
            let (_handle, events) = runner
                .launch(
                    &SessionId::from("missing"),
                    &config(1, 1, 0),
                    &dir.path().join("a.js"),
                )
                .await?;
            let (_lines, outcome) = collect(events).await?;
            if outcome.kind != ExitKind::Clean {
                return Err(AppError::engine(format!("Unexpected outcome: {:?}", outcome)));
            }
            Ok(())
        })
    }

    #[test]
    fn terminate_reaches_forked_children() -> AppResult<()> {
        run_async_test(async {
            let dir = tempfile::tempdir()?;
            let engine = write_fake_engine(
                dir.path(),
                "engine.sh",
                "echo started\nsleep 8\necho after",
            )?;
            let runner = runner(&engine, dir.path());
            let (handle, mut events) = runner
                .launch(
                    &SessionId::from("forked"),
                    &config(1, 30, 0),
                    &dir.path().join("a.js"),
                )
                .await?;
            match events.recv().await {
                Some(ProcessEvent::Line(line)) if line == "started" => {}
                other => return Err(AppError::engine(format!("Unexpected event: {:?}", other))),
            }
            let started = tokio::time::Instant::now();
            handle.terminate();
            let (lines, outcome) = collect(events).await?;
            if outcome.kind != ExitKind::Terminated || !lines.is_empty() {
                return Err(AppError::engine(format!(
                    "Unexpected result: {:?} {:?}",
                    lines, outcome
                )));
            }
            if started.elapsed() > Duration::from_secs(3) {
                return Err(AppError::engine(format!(
                    "Stop took {:?} with a 500ms kill timeout",
                    started.elapsed()
                )));
            }
            Ok(())
        })
    }

    #[test]
    fn exit_is_reported_when_background_child_holds_output() -> AppResult<()> {
        run_async_test(async {
            let dir = tempfile::tempdir()?;
            let engine =
                write_fake_engine(dir.path(), "engine.sh", "echo done\nsleep 8 &\nexit 0")?;
            let runner = runner(&engine, dir.path());
            let started = tokio::time::Instant::now();
            let (_handle, events) = runner
                .launch(
                    &SessionId::from("lingering"),
                    &config(1, 1, 0),
                    &dir.path().join("a.js"),
                )
                .await?;
            let (lines, outcome) = collect(events).await?;
            if outcome.kind != ExitKind::Clean || lines != ["done"] {
                return Err(AppError::engine(format!(
                    "Unexpected result: {:?} {:?}",
                    lines, outcome
                )));
            }
            if started.elapsed() > Duration::from_secs(3) {
                return Err(AppError::engine(format!(
                    "Exit took {:?} with a 500ms kill timeout",
                    started.elapsed()
                )));
            }
            Ok(())
        })
    }
}
