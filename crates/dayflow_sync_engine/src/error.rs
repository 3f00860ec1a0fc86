//! Error types for the sync engine.

use dayflow_core::EntityKind;
use dayflow_remote::RemoteError;
use dayflow_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store rejected an operation.
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    /// The remote store rejected an operation.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No stores are registered for the kind.
    #[error("no stores registered for {0}")]
    UnknownKind(EntityKind),

    /// A local and a remote store of different kinds were paired.
    #[error("cannot pair local {local} store with remote {remote} collection")]
    KindMismatch {
        /// Kind of the local store.
        local: EntityKind,
        /// Kind of the remote collection.
        remote: EntityKind,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The operation needs a signed-in user.
    #[error("no authenticated user")]
    NotAuthenticated,

    /// The operation was abandoned because the identity changed.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_retryable(),
            SyncError::Store(StoreError::Unavailable(_)) => true,
            _ => false,
        }
    }

    /// Returns true if the remote store refused the caller's credential.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SyncError::Remote(err) if err.is_permission_denied())
    }
}
