//! Error types for habit

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The store aborted the transaction; the whole request may be retried.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Store not initialized. Run 'habit init' first.")]
    NotInitialized,

    #[error("Store already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller may re-issue the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Short stable name of the error kind, used by request layers for
    /// machine-readable output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Conflict(_) => "conflict",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Unavailable(_) | Error::Io(_) => "unavailable",
            Error::DeadlineExceeded(_) => "deadline_exceeded",
            Error::Cancelled => "cancelled",
            Error::NotInitialized | Error::AlreadyInitialized(_) => "not_initialized",
            Error::Json(_) | Error::Other(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(Error::Conflict("daily_tracks".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::Unavailable("disk".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Error::AlreadyExists("a".into()).kind(), "already_exists");
        assert_eq!(Error::InvalidArgument("a".into()).kind(), "invalid_argument");
        let io = std::io::Error::other("boom");
        assert_eq!(Error::from(io).kind(), "unavailable");
    }
}
