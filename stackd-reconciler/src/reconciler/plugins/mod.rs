//! Resource plugins, one per sub-resource kind.
//!
//! The plugins differ only in how they compare specs and which backend calls
//! they make. Labelling and the update/delete bookkeeping live here.

pub mod config;
pub mod network;
pub mod secret;
pub mod service;

pub use config::ConfigPlugin;
pub use network::NetworkPlugin;
pub use secret::SecretPlugin;
pub use service::ServicePlugin;

use std::collections::BTreeMap;
use std::future::Future;

use crate::backend;
use crate::reconciler::error::Result;
use crate::reconciler::resource::ReconcileResource;
use crate::types::{ConfigSpec, NetworkCreate, STACK_LABEL, SecretSpec, ServiceSpec};

/// A desired spec that carries the ownership label.
trait Labelled: Clone {
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String>;
}

impl Labelled for ServiceSpec {
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.annotations.labels
    }
}

impl Labelled for SecretSpec {
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.annotations.labels
    }
}

impl Labelled for ConfigSpec {
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.annotations.labels
    }
}

impl Labelled for NetworkCreate {
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.labels
    }
}

/// The desired spec with the ownership label set.
fn labeled_spec<S: Labelled>(resource: &ReconcileResource<S>) -> Result<S> {
    let mut spec = resource.spec()?.clone();
    spec.labels_mut()
        .insert(STACK_LABEL.to_string(), resource.stack_id.clone());
    Ok(spec)
}

/// Push the labelled spec to the live object, presenting the version absorbed
/// from live state.
async fn update_with<S, F, Fut>(resource: &ReconcileResource<S>, update: F) -> Result<()>
where
    S: Labelled,
    F: FnOnce(String, u64, S) -> Fut,
    Fut: Future<Output = backend::Result<()>>,
{
    let spec = labeled_spec(resource)?;
    update(resource.id().to_string(), resource.version(), spec).await?;
    Ok(())
}

/// Remove the recorded object, if any, and forget its ID. An object that is
/// already gone counts as deleted.
async fn delete_with<S, F, Fut>(resource: &mut ReconcileResource<S>, remove: F) -> Result<()>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = backend::Result<()>>,
{
    if !resource.id().is_empty() {
        ignore_not_found(remove(resource.id().to_string()).await)?;
    }
    resource.clear_id();
    Ok(())
}

fn ignore_not_found(result: backend::Result<()>) -> backend::Result<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}
