//! Common error types for ideaforge

use thiserror::Error;

/// Common result type for ideaforge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session coordinator and its collaborators.
///
/// The first six variants form the taxonomy callers are expected to
/// branch on; the remaining variants wrap infrastructure failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation is valid but the session is not in the right state yet
    /// (wrong round, already submitted, already voted, not ready).
    /// Retryable after state changes.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed input (wrong idea cardinality, bad vote sum). Not retryable.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Caller lacks the credential the operation requires.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Referenced session/participant/cluster/idea does not exist.
    #[error("not found: {0}")]
    Missing(String),

    /// External collaborator (idea contributor, semantic grouper,
    /// idea assessor) unreachable, timed out, or returned garbage.
    #[error("external collaborator unavailable: {0}")]
    ExternalUnavailable(String),

    /// A race that the per-session critical section should make
    /// impossible. Indicates a bug; always logged.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            Error::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Error::Invalid(_) => "INVALID",
            Error::NotAuthorized(_) => "NOT_AUTHORIZED",
            Error::Missing(_) => "MISSING",
            Error::ExternalUnavailable(_) => "EXTERNAL_UNAVAILABLE",
            Error::Conflict(_) => "CONFLICT",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(Error::PreconditionFailed("x".into()).code(), "PRECONDITION_FAILED");
        assert_eq!(Error::Invalid("x".into()).code(), "INVALID");
        assert_eq!(Error::NotAuthorized("x".into()).code(), "NOT_AUTHORIZED");
        assert_eq!(Error::Missing("x".into()).code(), "MISSING");
        assert_eq!(Error::ExternalUnavailable("x".into()).code(), "EXTERNAL_UNAVAILABLE");
        assert_eq!(Error::Conflict("x".into()).code(), "CONFLICT");
    }

    #[test]
    fn test_error_display_includes_message() {
        let err = Error::PreconditionFailed("round 3 already submitted".into());
        assert_eq!(err.to_string(), "precondition failed: round 3 already submitted");
    }
}
