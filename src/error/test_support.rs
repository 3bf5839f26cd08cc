use super::{
    ConfigError, EngineError, MetricsError, ParseError, ReportError, ScriptError, ServerError,
    SessionError, ValidationError,
};

impl From<&'static str> for ValidationError {
    fn from(message: &'static str) -> Self {
        ValidationError::TestExpectation { message }
    }
}

impl From<String> for ValidationError {
    fn from(value: String) -> Self {
        ValidationError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ConfigError {
    fn from(message: &'static str) -> Self {
        ConfigError::TestExpectation { message }
    }
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        ConfigError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for EngineError {
    fn from(message: &'static str) -> Self {
        EngineError::TestExpectation { message }
    }
}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        EngineError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for MetricsError {
    fn from(message: &'static str) -> Self {
        MetricsError::TestExpectation { message }
    }
}

impl From<String> for MetricsError {
    fn from(value: String) -> Self {
        MetricsError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for SessionError {
    fn from(message: &'static str) -> Self {
        SessionError::TestExpectation { message }
    }
}

impl From<String> for SessionError {
    fn from(value: String) -> Self {
        SessionError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ServerError {
    fn from(message: &'static str) -> Self {
        ServerError::TestExpectation { message }
    }
}

impl From<String> for ServerError {
    fn from(value: String) -> Self {
        ServerError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ScriptError {
    fn from(message: &'static str) -> Self {
        ScriptError::TestExpectation { message }
    }
}

impl From<String> for ScriptError {
    fn from(value: String) -> Self {
        ScriptError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ReportError {
    fn from(message: &'static str) -> Self {
        ReportError::TestExpectation { message }
    }
}

impl From<String> for ReportError {
    fn from(value: String) -> Self {
        ReportError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ParseError {
    fn from(message: &'static str) -> Self {
        ParseError::TestExpectation { message }
    }
}

impl From<String> for ParseError {
    fn from(value: String) -> Self {
        ParseError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}
