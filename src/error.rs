use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),
}

pub type Result<T> = std::result::Result<T, SubflowError>;

/// Failure classification shared by stages, the engine and the batch runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsupported input. Never retried.
    Input,
    /// External tool or model temporarily unavailable. Retried.
    Transient,
    /// Disk or device exhaustion. Fatal for the pipeline, deferred by the batch runner.
    Resource,
    /// Invariant violation.
    Logic,
    /// Run cancelled between stages.
    Cancelled,
}

impl ErrorKind {
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Input => "INPUT_ERROR",
            ErrorKind::Transient => "TRANSIENT_ERROR",
            ErrorKind::Resource => "RESOURCE_ERROR",
            ErrorKind::Logic => "LOGIC_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified stage failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Logic, message)
    }

    /// Classify an IO failure: exhaustion is a resource problem, a missing
    /// file is bad input, anything else is assumed to be transient.
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let message = format!("{}: {}", context, err);
        match err.kind() {
            Io::NotFound | Io::InvalidData | Io::InvalidInput => Self::input(message),
            Io::PermissionDenied | Io::StorageFull | Io::OutOfMemory => Self::resource(message),
            _ => Self::transient(message),
        }
    }
}

impl From<SubflowError> for StageError {
    fn from(err: SubflowError) -> Self {
        match err {
            SubflowError::Stage(stage) => stage,
            SubflowError::Io(io) => StageError::from_io("IO failure", &io),
            SubflowError::Http(http) => StageError::transient(format!("HTTP failure: {}", http)),
            SubflowError::FileNotFound(path) => StageError::input(format!("File not found: {}", path)),
            other => StageError::logic(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_recoverable() {
        assert!(ErrorKind::Transient.is_recoverable());
        assert!(!ErrorKind::Input.is_recoverable());
        assert!(!ErrorKind::Resource.is_recoverable());
        assert!(!ErrorKind::Logic.is_recoverable());
        assert!(!ErrorKind::Cancelled.is_recoverable());
    }

    #[test]
    fn test_io_classification() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(StageError::from_io("open", &missing).kind, ErrorKind::Input);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert_eq!(StageError::from_io("write", &denied).kind, ErrorKind::Resource);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(StageError::from_io("call", &reset).kind, ErrorKind::Transient);
    }

    #[test]
    fn test_display_includes_kind() {
        let err = StageError::input("unsupported container");
        assert_eq!(err.to_string(), "INPUT_ERROR: unsupported container");
    }
}
