use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Session {session_id} already has a running engine process.")]
    Conflict { session_id: String },
    #[error("Failed to spawn engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Engine process for session {session_id} has no {stream} pipe.")]
    MissingPipe {
        session_id: String,
        stream: &'static str,
    },
    #[error("Failed to write engine config '{path}': {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
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
