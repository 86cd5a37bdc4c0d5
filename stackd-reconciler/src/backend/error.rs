//! Backend error types.

use thiserror::Error;

use crate::types::ResourceKind;

/// Errors that can occur during backend operations.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Object not found. Callers treat this as "already gone".
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// Version mismatch (optimistic concurrency control).
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// Conflict with an existing object.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The substrate could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        BackendError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, BackendError::VersionMismatch { .. })
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
