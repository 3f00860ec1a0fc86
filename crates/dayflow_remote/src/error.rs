//! Error types for remote store operations.

use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The caller's credential is not allowed to perform the operation.
    ///
    /// On the session path this means another device has taken over.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The remote store could not be reached.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The addressed document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The request was malformed or conflicts with existing data.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client or subscription has been shut down.
    #[error("remote connection closed")]
    Closed,
}

impl RemoteError {
    /// Returns true if this error is an access-rule rejection.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RemoteError::PermissionDenied(_))
    }

    /// Returns true if retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}
