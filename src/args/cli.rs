use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::defaults::{
    DEFAULT_COMPLETION_GRACE, DEFAULT_CONTROL_LISTEN, DEFAULT_ENGINE_PROGRAM,
    DEFAULT_HISTORY_CAPACITY, DEFAULT_KILL_TIMEOUT, DEFAULT_OUTPUT_CAPACITY,
    DEFAULT_PUBLISH_INTERVAL, DEFAULT_REPORTS_DIR, DEFAULT_RETENTION, DEFAULT_SAMPLING_INTERVAL,
    DEFAULT_SCRIPTS_DIR, DEFAULT_STREAM_LISTEN,
};
use super::parsers::{parse_duration_arg, parse_listen_addr, parse_positive_usize};
use super::types::PositiveUsize;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Control plane for k6 load tests - supervised engine runs, live aggregated metrics over WebSocket, and JSON reports."
)]
pub struct ServerArgs {
    /// Path to config file (TOML or JSON)
    #[arg(long = "config", env = "LOADCTL_CONFIG")]
    pub config: Option<String>,

    /// Address of the JSON control API
    #[arg(
        long = "control-listen",
        env = "LOADCTL_CONTROL_LISTEN",
        default_value = DEFAULT_CONTROL_LISTEN,
        value_parser = parse_listen_addr
    )]
    pub control_listen: String,

    /// Address of the WebSocket metrics stream
    #[arg(
        long = "stream-listen",
        env = "LOADCTL_STREAM_LISTEN",
        default_value = DEFAULT_STREAM_LISTEN,
        value_parser = parse_listen_addr
    )]
    pub stream_listen: String,

    /// Engine executable (looked up on PATH)
    #[arg(long = "engine", env = "LOADCTL_ENGINE", default_value = DEFAULT_ENGINE_PROGRAM)]
    pub engine: String,

    /// Extra argument passed to every engine run (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Directory holding test scripts, addressed by file name
    #[arg(long = "scripts-dir", env = "LOADCTL_SCRIPTS_DIR", default_value = DEFAULT_SCRIPTS_DIR)]
    pub scripts_dir: PathBuf,

    /// Directory where final reports are written
    #[arg(long = "reports-dir", env = "LOADCTL_REPORTS_DIR", default_value = DEFAULT_REPORTS_DIR)]
    pub reports_dir: PathBuf,

    /// Grace period between SIGTERM and a forced kill (supports ms/s/m/h)
    #[arg(long = "kill-timeout", default_value = DEFAULT_KILL_TIMEOUT, value_parser = parse_duration_arg)]
    pub kill_timeout: Duration,

    /// Minimum interval between metrics pushes per test (supports ms/s/m/h)
    #[arg(long = "publish-interval", default_value = DEFAULT_PUBLISH_INTERVAL, value_parser = parse_duration_arg)]
    pub publish_interval: Duration,

    /// Batching window for point-stream engine output (supports ms/s/m/h)
    #[arg(long = "sampling-interval", default_value = DEFAULT_SAMPLING_INTERVAL, value_parser = parse_duration_arg)]
    pub sampling_interval: Duration,

    /// Allowed overrun past duration + ramp-up before a run is failed (supports ms/s/m/h)
    #[arg(long = "completion-grace", default_value = DEFAULT_COMPLETION_GRACE, value_parser = parse_duration_arg)]
    pub completion_grace: Duration,

    /// How long finished tests stay queryable by status (supports ms/s/m/h)
    #[arg(long = "retention", default_value = DEFAULT_RETENTION, value_parser = parse_duration_arg)]
    pub retention: Duration,

    /// Number of finished tests kept in history
    #[arg(long = "history-capacity", default_value = DEFAULT_HISTORY_CAPACITY, value_parser = parse_positive_usize)]
    pub history_capacity: PositiveUsize,

    /// Engine output lines buffered per test before reads pause
    #[arg(long = "output-capacity", default_value = DEFAULT_OUTPUT_CAPACITY, value_parser = parse_positive_usize)]
    pub output_capacity: PositiveUsize,

    /// Enable debug logging (or set LOADCTL_LOG / RUST_LOG)
    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Disable ANSI colors in log output
    #[arg(long = "no-color")]
    pub no_color: bool,
}
