use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Cli(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("log stream failed: {0}")]
    Stream(String),

    #[error("{0}")]
    Other(String),
}

/// Failure of a history fetch. The backend offers no structured error
/// taxonomy, so only the message is carried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HistoryError {
    pub message: String,
}

impl HistoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn is_entity_stopped(&self) -> bool {
        indicates_entity_stopped(&self.message)
    }
}

/// Transport level failure of a live stream (connect refused, non-2xx, read
/// error, unexpected EOF).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StreamError(pub String);

const STOPPED_MARKERS: &[&str] = &[
    "container is stopped",
    "container is not running",
    "not running",
    "is stopped",
];

/// The only place that decides whether a failure text means "the target is
/// not running" rather than a real error. Swap this for an error code once
/// the backend sends one.
pub fn indicates_entity_stopped(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    STOPPED_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_phrases_are_recognised() {
        assert!(indicates_entity_stopped("Container is stopped"));
        assert!(indicates_entity_stopped("service web is not running"));
        assert!(indicates_entity_stopped("CONTAINER IS STOPPED"));
        assert!(HistoryError::new("Container is stopped").is_entity_stopped());
    }

    #[test]
    fn other_failures_are_not_stopped() {
        assert!(!indicates_entity_stopped("internal server error"));
        assert!(!indicates_entity_stopped("connection refused"));
        assert!(!HistoryError::new("401 Unauthorized").is_entity_stopped());
    }
}
