//! Session identity, lifecycle states, and validated test configuration.
mod session;


pub use session::{
    SessionConfig, SessionId, SessionState, TestRequest, Thresholds, ThresholdsRequest,
};
