use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Engine record is not valid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("Malformed {record_type} record: {source}")]
    InvalidRecord {
        record_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid record timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("Engine output line exceeded max size ({max_bytes} bytes).")]
    LineTooLong { max_bytes: usize },
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
