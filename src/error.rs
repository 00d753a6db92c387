//! Error types for the article pipeline.
//!
//! Every stage (search, fetch, extract, summarize) reports failures through
//! [`Error`]. The orchestrator never propagates an [`Error`] out of a run;
//! it classifies it with [`Error::kind`] and attaches a cloneable
//! [`StageError`] to the article state and to the notification it emits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used by the stage components.
pub type Result<T> = std::result::Result<T, Error>;

/// A stage failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure talking to a remote endpoint, or a dead document link.
    #[error("network error: {0}")]
    Network(String),

    /// The search endpoint answered with an unexpected status or body.
    #[error("unexpected response from {endpoint}: {message}")]
    Protocol { endpoint: String, message: String },

    /// The local destination could not be created or written.
    #[error("storage error at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },

    /// A referenced local document does not exist.
    #[error("document not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The document could not be parsed into pages and text.
    #[error("cannot read document {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    /// The generation credential was rejected.
    #[error("credential rejected by generation provider: {0}")]
    Auth(String),

    /// The generation provider refused the request for quota reasons.
    #[error("generation quota exhausted: {0}")]
    Quota(String),

    /// The generation call returned no usable result.
    #[error("generation provider error: {0}")]
    Provider(String),

    /// A stage exceeded its deadline.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// The run was abandoned before the stage finished.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Classify a `reqwest` transport error.
    pub fn network(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }

    pub fn storage(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Error::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn format(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Error::Format {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) => ErrorKind::Network,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::Storage { .. } => ErrorKind::Storage,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Format { .. } => ErrorKind::Format,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Quota(_) => ErrorKind::Quota,
            Error::Provider(_) => ErrorKind::Provider,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Failure classification carried by failed states and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Protocol,
    Storage,
    NotFound,
    Format,
    Auth,
    Quota,
    Provider,
    Timeout,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Storage => "StorageError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Format => "FormatError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::Quota => "QuotaError",
            ErrorKind::Provider => "ProviderError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Cloneable snapshot of an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for StageError {
    fn from(err: &Error) -> Self {
        StageError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<Error> for StageError {
    fn from(err: Error) -> Self {
        StageError::from(&err)
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Network("refused".into()).kind(), ErrorKind::Network);
        assert_eq!(
            Error::NotFound(PathBuf::from("/tmp/missing.pdf")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::Timeout {
                stage: "fetch",
                after: Duration::from_secs(3)
            }
            .kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_stage_error_keeps_message() {
        let err = Error::format("/tmp/a.pdf", "invalid file header");
        let stage_err = StageError::from(&err);
        assert_eq!(stage_err.kind, ErrorKind::Format);
        assert!(stage_err.message.contains("invalid file header"));
        assert!(stage_err.message.contains("/tmp/a.pdf"));
        assert_eq!(
            stage_err.to_string(),
            format!("FormatError: {}", stage_err.message)
        );
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
