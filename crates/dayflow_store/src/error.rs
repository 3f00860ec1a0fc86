//! Error types for local store operations.

use dayflow_core::{EntityId, EntityKind};
use std::io;
use thiserror::Error;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entity with the given ID exists.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Collection searched.
        kind: EntityKind,
        /// Missing entity ID.
        id: EntityId,
    },

    /// An entity with the given ID already exists.
    #[error("{kind} {id} already exists")]
    AlreadyExists {
        /// Collection written to.
        kind: EntityKind,
        /// Conflicting entity ID.
        id: EntityId,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding the collection failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The collection file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// The store cannot be used right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if this error means the entity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true if this error means the ID is already taken.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}
