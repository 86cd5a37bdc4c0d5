//! Reconciliation error types.

use thiserror::Error;

use crate::backend::BackendError;
use crate::types::ResourceKind;

use super::resource::Mark;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A backend call failed.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// The goal-state write lost against a concurrent writer.
    #[error("goal state of stack {stack_id} changed concurrently (expected version {expected}, found {actual})")]
    GoalConflict {
        stack_id: String,
        expected: u64,
        actual: u64,
    },

    /// A resource was asked to be created or updated without a spec.
    #[error("{kind} {name} has no spec")]
    MissingSpec { kind: ResourceKind, name: String },

    /// A resource reached the mutation phase with a non-terminal mark.
    #[error("{kind} {name} left in state {mark:?}")]
    UnresolvedMark {
        kind: ResourceKind,
        name: String,
        mark: Mark,
    },
}

impl ReconcileError {
    /// Map a failed goal-state write, turning a version mismatch into a
    /// [`ReconcileError::GoalConflict`].
    pub fn from_goal_write(stack_id: &str, err: BackendError) -> Self {
        match err {
            BackendError::VersionMismatch { expected, actual } => ReconcileError::GoalConflict {
                stack_id: stack_id.to_string(),
                expected,
                actual,
            },
            other => ReconcileError::Backend(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Backend(err) if err.is_not_found())
    }

    /// Whether the error signals a concurrent mutator.
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::GoalConflict { .. } => true,
            ReconcileError::Backend(err) => err.is_version_mismatch(),
            _ => false,
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;
