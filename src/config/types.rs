use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;

/// On-disk configuration; every field is optional and only fills values the
/// command line left at their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub control_listen: Option<String>,
    pub stream_listen: Option<String>,
    pub scripts_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub history_capacity: Option<usize>,
    pub verbose: Option<bool>,
    pub no_color: Option<bool>,
    pub engine: Option<EngineConfig>,
    pub sessions: Option<SessionsConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub kill_timeout: Option<DurationValue>,
    pub output_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsConfig {
    pub publish_interval: Option<DurationValue>,
    pub sampling_interval: Option<DurationValue>,
    pub completion_grace: Option<DurationValue>,
    pub retention: Option<DurationValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => {
                if *secs == 0 {
                    Err(ValidationError::DurationZero)
                } else {
                    Ok(Duration::from_secs(*secs))
                }
            }
            DurationValue::Text(text) => super::parse_duration_value(text),
        }
    }
}
