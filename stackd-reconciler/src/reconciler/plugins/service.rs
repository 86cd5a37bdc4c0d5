//! Service plugin.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{Backend, ListFilter};
use crate::reconciler::error::Result;
use crate::reconciler::plugin::ResourcePlugin;
use crate::reconciler::resource::ReconcileResource;
use crate::types::{ResourceKind, Service, ServiceSpec, StackSpec};

use super::{delete_with, labeled_spec, update_with};

pub struct ServicePlugin {
    backend: Arc<dyn Backend>,
}

impl ServicePlugin {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResourcePlugin for ServicePlugin {
    type Spec = ServiceSpec;
    type Active = Service;

    const KIND: ResourceKind = ResourceKind::Service;

    fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn desired(&self, spec: &StackSpec) -> Vec<(String, ServiceSpec)> {
        spec.services
            .iter()
            .map(|s| (s.annotations.name.clone(), s.clone()))
            .collect()
    }

    async fn get_active_resource(&self, id: &str) -> Result<Service> {
        Ok(self.backend.get_service(id).await?)
    }

    async fn get_active_resources(&self, stack_id: &str) -> Result<Vec<Service>> {
        Ok(self
            .backend
            .list_services(&ListFilter::stack(stack_id))
            .await?)
    }

    fn has_same_configuration(&self, goal: &ServiceSpec, active: &Service) -> bool {
        goal.annotations.without_stack_label() == active.spec.annotations.without_stack_label()
            && goal.task_template == active.spec.task_template
            && goal.mode == active.spec.mode
            && goal.endpoint == active.spec.endpoint
    }

    async fn create_resource(&self, resource: &mut ReconcileResource<ServiceSpec>) -> Result<()> {
        let spec = labeled_spec(resource)?;
        let id = self.backend.create_service(spec).await?;
        debug!(service = %resource.name(), id = %id, "service created");
        resource.resource.id = id;
        Ok(())
    }

    async fn update_resource(&self, resource: &mut ReconcileResource<ServiceSpec>) -> Result<()> {
        let backend = &self.backend;
        update_with(resource, |id, version, spec| async move {
            backend.update_service(&id, version, spec).await
        })
        .await
    }

    async fn delete_resource(&self, resource: &mut ReconcileResource<ServiceSpec>) -> Result<()> {
        let backend = &self.backend;
        delete_with(resource, |id| async move { backend.remove_service(&id).await }).await
    }
}
