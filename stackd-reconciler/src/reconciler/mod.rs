//! Stack reconciliation.
//!
//! The [`Reconciler`] is what the dispatcher calls for each changed object.
//! [`StackReconciler`] resolves the object to its owning stack and runs one
//! [`Algorithm`] pass per resource kind, in dependency order: secrets,
//! configs, networks, then services.

pub mod algorithm;
pub mod error;
pub mod plugin;
pub mod plugins;
pub mod resource;
pub mod stack;

pub use algorithm::{Algorithm, KindReconciler};
pub use error::{ReconcileError, Result};
pub use plugin::ResourcePlugin;
pub use resource::{Mark, ReconcileResource};
pub use stack::StackReconciler;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::types::ResourceKind;

/// A request to bring the stack owning `(kind, id)` back in line with its
/// spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub kind: ResourceKind,
    pub id: String,
    /// Goal resource IDs the pass must leave alone.
    pub skip: BTreeSet<String>,
}

impl ReconcileRequest {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            skip: BTreeSet::new(),
        }
    }

    pub fn stack(id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Stack, id)
    }

    pub fn with_skipped(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.skip.extend(ids);
        self
    }
}

/// Trait for object reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Converge whatever `request` points at. Objects that no longer exist,
    /// or that belong to no stack, are not an error.
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<()>;
}
