//! Reconciler for whole stacks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::notifier::ObjectChangeNotifier;
use crate::types::{ActiveResource, ResourceKind};

use super::algorithm::{Algorithm, KindReconciler};
use super::error::Result;
use super::plugin::ResourcePlugin;
use super::plugins::{ConfigPlugin, NetworkPlugin, SecretPlugin, ServicePlugin};
use super::{ReconcileRequest, Reconciler};

pub struct StackReconciler {
    backend: Arc<dyn Backend>,
    notifier: Arc<dyn ObjectChangeNotifier>,
}

impl StackReconciler {
    pub fn new(backend: Arc<dyn Backend>, notifier: Arc<dyn ObjectChangeNotifier>) -> Self {
        Self { backend, notifier }
    }

    /// The stack a request is about, or `None` if there is nothing to do.
    async fn resolve_stack_id(&self, request: &ReconcileRequest) -> Result<Option<String>> {
        let backend = self.backend.clone();
        match request.kind {
            ResourceKind::Stack => Ok(Some(request.id.clone())),
            ResourceKind::Service => owning_stack(&ServicePlugin::new(backend), &request.id).await,
            ResourceKind::Secret => owning_stack(&SecretPlugin::new(backend), &request.id).await,
            ResourceKind::Config => owning_stack(&ConfigPlugin::new(backend), &request.id).await,
            ResourceKind::Network => owning_stack(&NetworkPlugin::new(backend), &request.id).await,
        }
    }

    /// One algorithm per kind, in convergence order.
    fn algorithms(&self, request: &ReconcileRequest) -> Vec<Box<dyn KindReconciler>> {
        ResourceKind::CONVERGENCE_ORDER
            .iter()
            .filter_map(|kind| self.algorithm(*kind, request))
            .collect()
    }

    fn algorithm(
        &self,
        kind: ResourceKind,
        request: &ReconcileRequest,
    ) -> Option<Box<dyn KindReconciler>> {
        let backend = self.backend.clone();
        let notifier = self.notifier.clone();
        let skip = request.skip.clone();
        let algorithm: Box<dyn KindReconciler> = match kind {
            ResourceKind::Secret => {
                Box::new(Algorithm::new(SecretPlugin::new(backend), notifier).with_skipped(skip))
            }
            ResourceKind::Config => {
                Box::new(Algorithm::new(ConfigPlugin::new(backend), notifier).with_skipped(skip))
            }
            ResourceKind::Network => {
                Box::new(Algorithm::new(NetworkPlugin::new(backend), notifier).with_skipped(skip))
            }
            ResourceKind::Service => {
                Box::new(Algorithm::new(ServicePlugin::new(backend), notifier).with_skipped(skip))
            }
            ResourceKind::Stack => return None,
        };
        Some(algorithm)
    }
}

async fn owning_stack<P: ResourcePlugin>(plugin: &P, id: &str) -> Result<Option<String>> {
    match plugin.get_active_resource(id).await {
        Ok(active) => Ok(active.stack_id().map(str::to_string)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl Reconciler for StackReconciler {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<()> {
        let Some(stack_id) = self.resolve_stack_id(request).await? else {
            debug!(kind = %request.kind, id = %request.id, "not owned by any stack, nothing to do");
            return Ok(());
        };

        let mut snapshot = match self.backend.get_snapshot_stack(&stack_id).await {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_not_found() => {
                debug!(stack_id = %stack_id, "stack is gone, nothing to do");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            stack_id = %stack_id,
            stack = %snapshot.name,
            version = snapshot.version(),
            "reconciling stack"
        );

        for algorithm in self.algorithms(request) {
            snapshot = algorithm.reconcile(snapshot).await?;
        }

        debug!(stack_id = %stack_id, version = snapshot.version(), "stack converged");
        Ok(())
    }
}
