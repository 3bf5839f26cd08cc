/// Config filenames probed in the working directory when `--config` is absent.
pub(crate) const DEFAULT_CONFIG_FILES: [&str; 2] = ["loadctl.toml", "loadctl.json"];

pub(crate) const DEFAULT_CONTROL_LISTEN: &str = "127.0.0.1:5001";
pub(crate) const DEFAULT_STREAM_LISTEN: &str = "127.0.0.1:5002";
pub(crate) const DEFAULT_ENGINE_PROGRAM: &str = "k6";
pub(crate) const DEFAULT_SCRIPTS_DIR: &str = "scripts";
pub(crate) const DEFAULT_REPORTS_DIR: &str = "reports";
pub(crate) const DEFAULT_KILL_TIMEOUT: &str = "5s";
pub(crate) const DEFAULT_PUBLISH_INTERVAL: &str = "250ms";
pub(crate) const DEFAULT_SAMPLING_INTERVAL: &str = "1s";
pub(crate) const DEFAULT_COMPLETION_GRACE: &str = "30s";
pub(crate) const DEFAULT_RETENTION: &str = "300s";
pub(crate) const DEFAULT_HISTORY_CAPACITY: &str = "200";
pub(crate) const DEFAULT_OUTPUT_CAPACITY: &str = "1024";
