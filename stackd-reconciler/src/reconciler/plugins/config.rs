//! Config plugin.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{Backend, ListFilter};
use crate::reconciler::error::Result;
use crate::reconciler::plugin::ResourcePlugin;
use crate::reconciler::resource::ReconcileResource;
use crate::types::{Config, ConfigSpec, ResourceKind, StackSpec};

use super::{delete_with, labeled_spec, update_with};

pub struct ConfigPlugin {
    backend: Arc<dyn Backend>,
}

impl ConfigPlugin {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResourcePlugin for ConfigPlugin {
    type Spec = ConfigSpec;
    type Active = Config;

    const KIND: ResourceKind = ResourceKind::Config;

    fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn desired(&self, spec: &StackSpec) -> Vec<(String, ConfigSpec)> {
        spec.configs
            .iter()
            .map(|c| (c.annotations.name.clone(), c.clone()))
            .collect()
    }

    async fn get_active_resource(&self, id: &str) -> Result<Config> {
        Ok(self.backend.get_config(id).await?)
    }

    async fn get_active_resources(&self, stack_id: &str) -> Result<Vec<Config>> {
        Ok(self
            .backend
            .list_configs(&ListFilter::stack(stack_id))
            .await?)
    }

    fn has_same_configuration(&self, goal: &ConfigSpec, active: &Config) -> bool {
        goal.annotations.without_stack_label() == active.spec.annotations.without_stack_label()
            && goal.templating == active.spec.templating
            && goal.data == active.spec.data
    }

    async fn create_resource(&self, resource: &mut ReconcileResource<ConfigSpec>) -> Result<()> {
        let spec = labeled_spec(resource)?;
        let id = self.backend.create_config(spec).await?;
        debug!(config = %resource.name(), id = %id, "config created");
        resource.resource.id = id;
        Ok(())
    }

    async fn update_resource(&self, resource: &mut ReconcileResource<ConfigSpec>) -> Result<()> {
        let backend = &self.backend;
        update_with(resource, |id, version, spec| async move {
            backend.update_config(&id, version, spec).await
        })
        .await
    }

    async fn delete_resource(&self, resource: &mut ReconcileResource<ConfigSpec>) -> Result<()> {
        let backend = &self.backend;
        delete_with(resource, |id| async move { backend.remove_config(&id).await }).await
    }
}
