use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

use crate::domain::{SessionConfig, Thresholds};

/// Environment overrides applied on top of the inherited environment.
pub const ENGINE_ENV: [(&str, &str); 3] = [
    ("K6_NO_USAGE_REPORT", "true"),
    ("LANG", "en_US.UTF-8"),
    ("LC_ALL", "en_US.UTF-8"),
];

/// Fully resolved engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<OsString>,
    /// Engine options document to write before spawning, with its path.
    pub options_file: Option<(PathBuf, String)>,
}

/// Build the engine invocation for a session.
#[must_use]
pub fn build_command(
    program: &str,
    extra_args: &[String],
    config: &SessionConfig,
    script_path: &Path,
    options_path: &Path,
) -> EngineCommand {
    let mut args: Vec<OsString> = vec!["run".into(), "--out".into(), "json=-".into()];
    args.extend(extra_args.iter().map(OsString::from));

    if config.ramp_up_secs > 0 {
        args.push("--stage".into());
        args.push("0s:0".into());
        args.push("--stage".into());
        args.push(format!("{}s:{}", config.ramp_up_secs, config.vus).into());
        args.push("--stage".into());
        args.push(format!("{}s:{}", config.duration_secs, config.vus).into());
    } else {
        args.push("--vus".into());
        args.push(config.vus.to_string().into());
        args.push("--duration".into());
        args.push(format!("{}s", config.duration_secs).into());
    }

    let options_file = options_document(&config.thresholds).map(|document| {
        args.push("--config".into());
        args.push(options_path.as_os_str().to_owned());
        (options_path.to_path_buf(), document.to_string())
    });

    args.push(script_path.as_os_str().to_owned());

    EngineCommand {
        program: program.to_owned(),
        args,
        options_file,
    }
}

/// Engine expression for the p95 latency bound.
#[must_use]
pub fn latency_expression(latency_p95_ms: u64) -> String {
    format!("p(95)<{}", latency_p95_ms)
}

/// Engine expression for the failure-rate bound, as a fraction of 1.
#[must_use]
pub fn error_rate_expression(error_rate_x100: u64) -> String {
    format!(
        "rate<{}.{:04}",
        error_rate_x100 / 10_000,
        error_rate_x100 % 10_000
    )
}

fn options_document(thresholds: &Thresholds) -> Option<Value> {
    if thresholds.is_empty() {
        return None;
    }
    let mut rules = Map::new();
    if let Some(latency) = thresholds.latency_p95_ms {
        rules.insert(
            "http_req_duration".to_owned(),
            json!([latency_expression(latency)]),
        );
    }
    if let Some(rate) = thresholds.error_rate_x100 {
        rules.insert(
            "http_req_failed".to_owned(),
            json!([error_rate_expression(rate)]),
        );
    }
    Some(json!({ "thresholds": rules }))
}
