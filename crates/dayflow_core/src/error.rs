//! Error types for Dayflow core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while building or parsing core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity document is not a JSON object or lacks required fields.
    #[error("invalid entity document: {0}")]
    InvalidDocument(String),

    /// An identifier is empty or malformed.
    #[error("invalid id: {0:?}")]
    InvalidId(String),

    /// A kind name that does not map to any entity kind.
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
