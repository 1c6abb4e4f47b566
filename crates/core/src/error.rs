use thiserror::Error;

use crate::types::ErrorType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend answered but the conversation is not readable yet.
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// A classified failure that will not be retried any further.
    #[error("error: {message}")]
    Terminal { kind: ErrorType, message: String },

    #[error("stream=true not supported")]
    StreamingUnsupported,

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn terminal(kind: ErrorType, message: impl Into<String>) -> Self {
        Error::Terminal {
            kind,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Error category as seen by the retry policy.
    pub fn error_type(&self) -> Option<ErrorType> {
        match self {
            Error::Terminal { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_display_is_prefixed() {
        let err = Error::terminal(ErrorType::Length, "message too long");
        assert_eq!(err.to_string(), "error: message too long");
        assert_eq!(err.error_type(), Some(ErrorType::Length));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_is_distinct() {
        let err = Error::Timeout("no reply after 5s".into());
        assert!(err.is_timeout());
        assert_eq!(err.error_type(), None);
    }
}
