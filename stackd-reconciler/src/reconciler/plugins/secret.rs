//! Secret plugin.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{Backend, ListFilter};
use crate::reconciler::error::Result;
use crate::reconciler::plugin::ResourcePlugin;
use crate::reconciler::resource::ReconcileResource;
use crate::types::{ResourceKind, Secret, SecretSpec, StackSpec};

use super::{delete_with, labeled_spec, update_with};

pub struct SecretPlugin {
    backend: Arc<dyn Backend>,
}

impl SecretPlugin {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResourcePlugin for SecretPlugin {
    type Spec = SecretSpec;
    type Active = Secret;

    const KIND: ResourceKind = ResourceKind::Secret;

    fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn desired(&self, spec: &StackSpec) -> Vec<(String, SecretSpec)> {
        spec.secrets
            .iter()
            .map(|s| (s.annotations.name.clone(), s.clone()))
            .collect()
    }

    async fn get_active_resource(&self, id: &str) -> Result<Secret> {
        Ok(self.backend.get_secret(id).await?)
    }

    async fn get_active_resources(&self, stack_id: &str) -> Result<Vec<Secret>> {
        Ok(self
            .backend
            .list_secrets(&ListFilter::stack(stack_id))
            .await?)
    }

    fn has_same_configuration(&self, goal: &SecretSpec, active: &Secret) -> bool {
        goal.annotations.without_stack_label() == active.spec.annotations.without_stack_label()
            && goal.driver == active.spec.driver
            && goal.data == active.spec.data
    }

    async fn create_resource(&self, resource: &mut ReconcileResource<SecretSpec>) -> Result<()> {
        let spec = labeled_spec(resource)?;
        let id = self.backend.create_secret(spec).await?;
        debug!(secret = %resource.name(), id = %id, "secret created");
        resource.resource.id = id;
        Ok(())
    }

    async fn update_resource(&self, resource: &mut ReconcileResource<SecretSpec>) -> Result<()> {
        let backend = &self.backend;
        update_with(resource, |id, version, spec| async move {
            backend.update_secret(&id, version, spec).await
        })
        .await
    }

    async fn delete_resource(&self, resource: &mut ReconcileResource<SecretSpec>) -> Result<()> {
        let backend = &self.backend;
        delete_with(resource, |id| async move { backend.remove_secret(&id).await }).await
    }
}
