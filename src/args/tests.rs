use std::path::Path;
use std::time::Duration;

use clap::Parser;

use super::ServerArgs;
use crate::error::{AppError, AppResult};

fn parse<const N: usize>(args: [&str; N]) -> AppResult<ServerArgs> {
    ServerArgs::try_parse_from(args).map_err(AppError::from)
}

#[test]
fn defaults_match_documented_values() -> AppResult<()> {
    let args = parse(["loadctl"])?;
    if args.control_listen != "127.0.0.1:5001" || args.stream_listen != "127.0.0.1:5002" {
        return Err(AppError::validation(format!(
            "Unexpected listen defaults: {} {}",
            args.control_listen, args.stream_listen
        )));
    }
    if args.engine != "k6" || !args.engine_args.is_empty() {
        return Err(AppError::validation("Unexpected engine defaults"));
    }
    if args.scripts_dir != Path::new("scripts") || args.reports_dir != Path::new("reports") {
        return Err(AppError::validation("Unexpected directory defaults"));
    }
    let durations = [
        (args.kill_timeout, Duration::from_secs(5)),
        (args.publish_interval, Duration::from_millis(250)),
        (args.sampling_interval, Duration::from_secs(1)),
        (args.completion_grace, Duration::from_secs(30)),
        (args.retention, Duration::from_secs(300)),
    ];
    if durations.iter().any(|(actual, expected)| actual != expected) {
        return Err(AppError::validation(format!(
            "Unexpected duration defaults: {:?}",
            durations
        )));
    }
    if args.history_capacity.get() != 200 || args.output_capacity.get() != 1024 {
        return Err(AppError::validation("Unexpected capacity defaults"));
    }
    if args.verbose || args.no_color || args.config.is_some() {
        return Err(AppError::validation("Flags should default to off"));
    }
    Ok(())
}

#[test]
fn overrides_are_parsed() -> AppResult<()> {
    let args = parse([
        "loadctl",
        "--control-listen",
        "0.0.0.0:8080",
        "--engine",
        "/opt/k6/bin/k6",
        "--engine-arg",
        "--quiet",
        "--engine-arg",
        "--no-thresholds",
        "--kill-timeout",
        "1500ms",
        "--retention",
        "2m",
        "--history-capacity",
        "5",
        "-v",
    ])?;
    if args.control_listen != "0.0.0.0:8080" || args.engine != "/opt/k6/bin/k6" {
        return Err(AppError::validation("Overrides not applied"));
    }
    if args.engine_args != vec!["--quiet".to_owned(), "--no-thresholds".to_owned()] {
        return Err(AppError::validation(format!(
            "Unexpected engine args {:?}",
            args.engine_args
        )));
    }
    if args.kill_timeout != Duration::from_millis(1500)
        || args.retention != Duration::from_secs(120)
    {
        return Err(AppError::validation("Duration suffixes not honored"));
    }
    if args.history_capacity.get() != 5 || !args.verbose {
        return Err(AppError::validation("Capacity or verbose not applied"));
    }
    Ok(())
}

#[test]
fn invalid_values_are_rejected() -> AppResult<()> {
    let cases: [&[&str]; 5] = [
        &["loadctl", "--control-listen", "localhost"],
        &["loadctl", "--kill-timeout", "5x"],
        &["loadctl", "--retention", "0s"],
        &["loadctl", "--history-capacity", "0"],
        &["loadctl", "--output-capacity", "-3"],
    ];
    for case in cases {
        if ServerArgs::try_parse_from(case).is_ok() {
            return Err(AppError::validation(format!("Accepted invalid args {:?}", case)));
        }
    }
    Ok(())
}
