use std::net::SocketAddr;
use std::time::Duration;

use super::types::PositiveUsize;
use crate::config::parse_duration_value;
use crate::error::{AppError, AppResult, ValidationError};

pub(crate) fn parse_duration_arg(s: &str) -> AppResult<Duration> {
    parse_duration_value(s).map_err(AppError::validation)
}

pub(super) fn parse_positive_usize(s: &str) -> AppResult<PositiveUsize> {
    s.parse::<PositiveUsize>().map_err(AppError::from)
}

/// Validate a `host:port` listen address, keeping the caller's spelling.
pub(crate) fn parse_listen_addr(s: &str) -> Result<String, ValidationError> {
    let value = s.trim();
    value
        .parse::<SocketAddr>()
        .map(|_addr| value.to_owned())
        .map_err(|err| ValidationError::InvalidListenAddr {
            value: value.to_owned(),
            source: err,
        })
}
