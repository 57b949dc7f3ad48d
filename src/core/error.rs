use std::time::Duration;

/// Failure of a single fetch against a broker's management endpoint.
///
/// These never escape a poll cycle: the poller logs them (throttled) and
/// carries on with the next scheduled cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Setup-time errors surfaced to the caller of a monitor operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid broker location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("monitor is shutting down")]
    ShuttingDown,

    #[error("no async runtime available to schedule polling")]
    NoRuntime,

    #[error("configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    pub(crate) fn invalid_location(location: &str, reason: impl Into<String>) -> Self {
        MonitorError::InvalidLocation {
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
