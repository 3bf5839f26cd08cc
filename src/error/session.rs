use super::{MetricsError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid test configuration: {source}")]
    InvalidConfig {
        #[from]
        source: ValidationError,
    },
    #[error("Script '{script_id}' not found.")]
    ScriptNotFound { script_id: String },
    #[error("Test {session_id} not found.")]
    NotFound { session_id: String },
    #[error("Test {session_id} already exists.")]
    Conflict { session_id: String },
    #[error("Failed to allocate metrics aggregate: {source}")]
    Aggregate {
        #[from]
        source: MetricsError,
    },
    #[error("Worker for test {session_id} is unavailable.")]
    WorkerUnavailable { session_id: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}

impl SessionError {
    /// HTTP-equivalent status for control responses.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            SessionError::InvalidConfig { .. } => 400,
            SessionError::ScriptNotFound { .. } | SessionError::NotFound { .. } => 404,
            SessionError::Conflict { .. } => 409,
            SessionError::WorkerUnavailable { .. } => 503,
            SessionError::Aggregate { .. } => 500,
            #[cfg(test)]
            SessionError::TestExpectation { .. } | SessionError::TestExpectationValue { .. } => {
                500
            }
        }
    }
}
