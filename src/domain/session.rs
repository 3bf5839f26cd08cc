use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Opaque, never-reused identifier of one test session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id from the wall clock and 64 random bits.
    #[must_use]
    pub fn generate() -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let salt: u64 = rand::random();
        Self(format!("{:x}-{:016x}", now_ms, salt))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a session. `Idle` and the three terminal states are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Stopped | SessionState::Failed
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: SessionState) -> bool {
        match self {
            SessionState::Idle => matches!(next, SessionState::Starting),
            SessionState::Starting => matches!(next, SessionState::Running | SessionState::Failed),
            SessionState::Running => matches!(
                next,
                SessionState::Completed | SessionState::Stopped | SessionState::Failed
            ),
            SessionState::Completed | SessionState::Stopped | SessionState::Failed => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pass/fail conditions rendered into engine expressions and evaluated
/// against the final aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    /// 95th-percentile latency bound in milliseconds.
    pub latency_p95_ms: Option<u64>,
    /// Failure-rate bound in hundredths of a percent.
    pub error_rate_x100: Option<u64>,
}

impl Thresholds {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.latency_p95_ms.is_none() && self.error_rate_x100.is_none()
    }
}

/// Body of a start request as received from the control API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRequest {
    #[serde(alias = "script_id")]
    pub script_id: String,
    #[serde(default = "default_vus")]
    pub vus: u64,
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default, alias = "ramp_up", alias = "ramp_time", alias = "rampTime")]
    pub ramp_up: u64,
    #[serde(default)]
    pub thresholds: Option<ThresholdsRequest>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsRequest {
    #[serde(default, alias = "latency_p95_ms", alias = "latency")]
    pub latency_p95_ms: Option<u64>,
    /// Percent, fractional values allowed.
    #[serde(default, alias = "error_rate")]
    pub error_rate: Option<f64>,
}

const fn default_vus() -> u64 {
    1
}

const fn default_duration() -> u64 {
    30
}

/// Validated session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub script_id: String,
    pub vus: u64,
    pub duration_secs: u64,
    pub ramp_up_secs: u64,
    pub thresholds: Thresholds,
}

impl SessionConfig {
    /// Validate a raw request against the configuration bounds.
    ///
    /// # Errors
    ///
    /// Returns an error when the script id is empty, vus < 1, duration < 1s,
    /// or a threshold is out of range.
    pub fn from_request(request: &TestRequest) -> Result<Self, ValidationError> {
        let script_id = request.script_id.trim();
        if script_id.is_empty() {
            return Err(ValidationError::ScriptIdEmpty);
        }
        if request.vus < 1 {
            return Err(ValidationError::VirtualUsersTooSmall {
                value: request.vus,
            });
        }
        if request.duration < 1 {
            return Err(ValidationError::DurationTooShort {
                value: request.duration,
            });
        }
        let thresholds = match request.thresholds {
            Some(raw) => validate_thresholds(raw)?,
            None => Thresholds::default(),
        };
        Ok(Self {
            script_id: script_id.to_owned(),
            vus: request.vus,
            duration_secs: request.duration,
            ramp_up_secs: request.ramp_up,
            thresholds,
        })
    }

    /// Planned engine run time: ramp-up followed by the steady duration.
    #[must_use]
    pub fn planned_duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs.saturating_add(self.ramp_up_secs))
    }
}

fn validate_thresholds(raw: ThresholdsRequest) -> Result<Thresholds, ValidationError> {
    if raw.latency_p95_ms == Some(0) {
        return Err(ValidationError::LatencyThresholdZero);
    }
    let error_rate_x100 = match raw.error_rate {
        Some(value) if !(0.0..=100.0).contains(&value) => {
            return Err(ValidationError::ErrorRateThresholdOutOfRange { value });
        }
        Some(value) => Some(percent_to_x100(value)),
        None => None,
    };
    Ok(Thresholds {
        latency_p95_ms: raw.latency_p95_ms,
        error_rate_x100,
    })
}

#[expect(
    clippy::float_arithmetic,
    reason = "Percent inputs arrive as fractional JSON numbers."
)]
fn percent_to_x100(value: f64) -> u64 {
    (value * 100.0).round().max(0.0) as u64
}
