//! Network plugin.
//!
//! The substrate cannot update networks, so an existing network always
//! counts as matching its spec and `update_resource` does nothing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{Backend, ListFilter};
use crate::reconciler::error::Result;
use crate::reconciler::plugin::ResourcePlugin;
use crate::reconciler::resource::ReconcileResource;
use crate::types::{Network, NetworkCreate, ResourceKind, StackSpec};

use super::{delete_with, labeled_spec};

pub struct NetworkPlugin {
    backend: Arc<dyn Backend>,
}

impl NetworkPlugin {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResourcePlugin for NetworkPlugin {
    type Spec = NetworkCreate;
    type Active = Network;

    const KIND: ResourceKind = ResourceKind::Network;

    fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn desired(&self, spec: &StackSpec) -> Vec<(String, NetworkCreate)> {
        spec.networks
            .iter()
            .map(|(name, create)| (name.clone(), create.clone()))
            .collect()
    }

    async fn get_active_resource(&self, id: &str) -> Result<Network> {
        Ok(self.backend.get_network(id).await?)
    }

    async fn get_active_resources(&self, stack_id: &str) -> Result<Vec<Network>> {
        Ok(self
            .backend
            .list_networks(&ListFilter::stack(stack_id))
            .await?)
    }

    fn has_same_configuration(&self, _goal: &NetworkCreate, _active: &Network) -> bool {
        true
    }

    async fn create_resource(&self, resource: &mut ReconcileResource<NetworkCreate>) -> Result<()> {
        let spec = labeled_spec(resource)?;
        let id = self.backend.create_network(resource.name(), spec).await?;
        debug!(network = %resource.name(), id = %id, "network created");
        resource.resource.id = id;
        Ok(())
    }

    async fn update_resource(&self, resource: &mut ReconcileResource<NetworkCreate>) -> Result<()> {
        debug!(network = %resource.name(), "networks cannot be updated, skipping");
        Ok(())
    }

    async fn delete_resource(&self, resource: &mut ReconcileResource<NetworkCreate>) -> Result<()> {
        let backend = &self.backend;
        delete_with(resource, |id| async move { backend.remove_network(&id).await }).await
    }
}
