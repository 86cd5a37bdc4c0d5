//! Per-pass working records.

use crate::types::{ActiveResource, Meta, ResourceKind, SnapshotResource};

use super::error::{ReconcileError, Result};

/// What a pass decided to do with one resource.
///
/// Transitions within a pass: `Skip`/`Delete` are seeded from the goal list,
/// `Delete → Compare` when the spec still wants the resource,
/// `Compare → Same | Update` once the live resource is found, and
/// `Compare → Create` when it never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// Left untouched this pass.
    Skip,
    Delete,
    /// Wanted; waiting for live state.
    Compare,
    Create,
    Update,
    /// Live resource matches the spec.
    Same,
}

impl Mark {
    /// Whether this mark costs a substrate mutation.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Mark::Create | Mark::Update | Mark::Delete)
    }
}

/// One resource as seen during a single reconciliation pass.
///
/// Never persisted; only `resource` ends up in the stack's goal list.
#[derive(Debug, Clone)]
pub struct ReconcileResource<S> {
    pub resource: SnapshotResource,
    pub mark: Mark,
    pub kind: ResourceKind,
    pub stack_id: String,
    /// Desired spec, if the stack spec still names this resource.
    pub config: Option<S>,
}

impl<S> ReconcileResource<S> {
    /// A resource seeded from the goal list.
    pub fn from_goal(
        goal: SnapshotResource,
        mark: Mark,
        kind: ResourceKind,
        stack_id: &str,
    ) -> Self {
        Self {
            resource: goal,
            mark,
            kind,
            stack_id: stack_id.to_string(),
            config: None,
        }
    }

    /// A resource the spec asks for but the goal list does not know yet.
    pub fn to_create(name: String, config: S, kind: ResourceKind, stack_id: &str) -> Self {
        Self {
            resource: SnapshotResource::pending(name),
            mark: Mark::Create,
            kind,
            stack_id: stack_id.to_string(),
            config: Some(config),
        }
    }

    /// A live resource labelled for the stack but absent from its goal list.
    pub fn orphan(active: &impl ActiveResource, kind: ResourceKind, stack_id: &str) -> Self {
        Self {
            resource: SnapshotResource::new(active.id(), active.name(), active.version()),
            mark: Mark::Delete,
            kind,
            stack_id: stack_id.to_string(),
            config: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.resource.id
    }

    pub fn name(&self) -> &str {
        &self.resource.name
    }

    pub fn version(&self) -> u64 {
        self.resource.meta.version
    }

    /// Take over the identity and version of a live resource.
    pub fn absorb(&mut self, active: &impl ActiveResource) {
        self.resource.id = active.id().to_string();
        self.resource.meta = Meta::at(active.version());
    }

    /// Forget the substrate identity, e.g. after a delete.
    pub fn clear_id(&mut self) {
        self.resource.id.clear();
        self.resource.meta = Meta::default();
    }

    /// The desired spec, or an error if the resource has none.
    pub fn spec(&self) -> Result<&S> {
        self.config.as_ref().ok_or_else(|| ReconcileError::MissingSpec {
            kind: self.kind,
            name: self.resource.name.clone(),
        })
    }
}
