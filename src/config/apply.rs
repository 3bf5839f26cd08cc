use std::time::Duration;

use clap::ArgMatches;
use clap::parser::ValueSource;

use crate::args::{PositiveUsize, ServerArgs, parse_listen_addr};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};

use super::types::{ConfigFile, DurationValue, EngineConfig, SessionsConfig};

/// Applies configuration values to CLI arguments. Values given on the
/// command line or through the environment win.
///
/// # Errors
///
/// Returns an error when a config value is out of range or malformed.
pub fn apply_config(
    args: &mut ServerArgs,
    matches: &ArgMatches,
    config: &ConfigFile,
) -> AppResult<()> {
    if !is_explicit(matches, "control_listen")
        && let Some(addr) = config.control_listen.as_deref()
    {
        args.control_listen = invalid("control_listen", parse_listen_addr(addr))?;
    }

    if !is_explicit(matches, "stream_listen")
        && let Some(addr) = config.stream_listen.as_deref()
    {
        args.stream_listen = invalid("stream_listen", parse_listen_addr(addr))?;
    }

    if !is_explicit(matches, "scripts_dir")
        && let Some(dir) = config.scripts_dir.clone()
    {
        args.scripts_dir = dir;
    }

    if !is_explicit(matches, "reports_dir")
        && let Some(dir) = config.reports_dir.clone()
    {
        args.reports_dir = dir;
    }

    if !is_explicit(matches, "history_capacity")
        && let Some(capacity) = config.history_capacity
    {
        args.history_capacity = ensure_positive_usize(capacity, "history_capacity")?;
    }

    if !is_explicit(matches, "verbose")
        && let Some(verbose) = config.verbose
    {
        args.verbose = verbose;
    }

    if !is_explicit(matches, "no_color")
        && let Some(no_color) = config.no_color
    {
        args.no_color = no_color;
    }

    if let Some(engine) = config.engine.as_ref() {
        apply_engine_config(args, matches, engine)?;
    }
    if let Some(sessions) = config.sessions.as_ref() {
        apply_sessions_config(args, matches, sessions)?;
    }
    Ok(())
}

fn apply_engine_config(
    args: &mut ServerArgs,
    matches: &ArgMatches,
    engine: &EngineConfig,
) -> AppResult<()> {
    if !is_explicit(matches, "engine")
        && let Some(program) = engine.program.clone()
    {
        args.engine = program;
    }

    if !is_explicit(matches, "engine_args")
        && let Some(extra) = engine.args.clone()
    {
        args.engine_args = extra;
    }

    if !is_explicit(matches, "kill_timeout")
        && let Some(value) = engine.kill_timeout.as_ref()
    {
        args.kill_timeout = duration("engine.kill_timeout", value)?;
    }

    if !is_explicit(matches, "output_capacity")
        && let Some(capacity) = engine.output_capacity
    {
        args.output_capacity = ensure_positive_usize(capacity, "engine.output_capacity")?;
    }
    Ok(())
}

fn apply_sessions_config(
    args: &mut ServerArgs,
    matches: &ArgMatches,
    sessions: &SessionsConfig,
) -> AppResult<()> {
    if !is_explicit(matches, "publish_interval")
        && let Some(value) = sessions.publish_interval.as_ref()
    {
        args.publish_interval = duration("sessions.publish_interval", value)?;
    }

    if !is_explicit(matches, "sampling_interval")
        && let Some(value) = sessions.sampling_interval.as_ref()
    {
        args.sampling_interval = duration("sessions.sampling_interval", value)?;
    }

    if !is_explicit(matches, "completion_grace")
        && let Some(value) = sessions.completion_grace.as_ref()
    {
        args.completion_grace = duration("sessions.completion_grace", value)?;
    }

    if !is_explicit(matches, "retention")
        && let Some(value) = sessions.retention.as_ref()
    {
        args.retention = duration("sessions.retention", value)?;
    }
    Ok(())
}

fn is_explicit(matches: &ArgMatches, name: &str) -> bool {
    matches!(
        matches.value_source(name),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

fn ensure_positive_usize(value: usize, field: &'static str) -> AppResult<PositiveUsize> {
    invalid(field, PositiveUsize::try_from(value))
}

fn duration(field: &'static str, value: &DurationValue) -> AppResult<Duration> {
    invalid(field, value.to_duration())
}

fn invalid<T>(field: &'static str, result: Result<T, ValidationError>) -> AppResult<T> {
    result.map_err(|err| AppError::config(ConfigError::InvalidValue { field, source: err }))
}
