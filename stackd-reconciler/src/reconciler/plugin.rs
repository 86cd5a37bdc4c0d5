//! The per-kind contract the convergence algorithm runs against.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::types::{ActiveResource, ResourceKind, SnapshotResource, SnapshotStack, StackSpec};

use super::error::{ReconcileError, Result};
use super::resource::ReconcileResource;

/// Kind-specific knowledge for one resource type (service, secret, config,
/// network): how to read it, compare it, and mutate it.
#[async_trait]
pub trait ResourcePlugin: Send + Sync + 'static {
    /// The desired-state type taken from the stack spec.
    type Spec: Clone + Send + Sync + 'static;
    /// The live view returned by the backend.
    type Active: ActiveResource + 'static;

    const KIND: ResourceKind;

    fn backend(&self) -> &Arc<dyn Backend>;

    /// Desired resources of this kind, as `(name, spec)` in spec order.
    fn desired(&self, spec: &StackSpec) -> Vec<(String, Self::Spec)>;

    /// Fetch one live resource. `NotFound` means it is gone.
    async fn get_active_resource(&self, id: &str) -> Result<Self::Active>;

    /// All live resources labelled for the stack.
    async fn get_active_resources(&self, stack_id: &str) -> Result<Vec<Self::Active>>;

    /// Whether the live resource matches the spec, ignoring the ownership
    /// label.
    fn has_same_configuration(&self, goal: &Self::Spec, active: &Self::Active) -> bool;

    /// Create the resource with the ownership label and record its new ID.
    async fn create_resource(&self, resource: &mut ReconcileResource<Self::Spec>) -> Result<()>;

    async fn update_resource(&self, resource: &mut ReconcileResource<Self::Spec>) -> Result<()>;

    /// Delete the resource and clear its ID. Already gone counts as deleted.
    async fn delete_resource(&self, resource: &mut ReconcileResource<Self::Spec>) -> Result<()>;

    /// Write this kind's goal list into the snapshot with a version-checked
    /// update, returning the stored snapshot.
    async fn store_goals(
        &self,
        mut snapshot: SnapshotStack,
        goals: Vec<SnapshotResource>,
    ) -> Result<SnapshotStack> {
        let stack_id = snapshot.id.clone();
        let version = snapshot.version();
        snapshot.set_goals(Self::KIND, goals);

        self.backend()
            .update_snapshot_stack(&stack_id, snapshot, version)
            .await
            .map_err(|err| ReconcileError::from_goal_write(&stack_id, err))
    }
}
