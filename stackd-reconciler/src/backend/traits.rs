//! Backend trait definitions.
//!
//! These traits abstract the orchestration substrate, so the reconciler works
//! with domain objects and never with a specific cluster manager's API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::{
    Config, ConfigSpec, Event, EventFilter, Network, NetworkCreate, Secret, SecretSpec, Service,
    ServiceSpec, SnapshotStack, Stack, StackSpec, STACK_LABEL,
};

use super::error::Result;

// =============================================================================
// Filters and subscriptions
// =============================================================================

/// Restricts a list call to objects carrying a given label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub label: Option<(String, String)>,
}

impl ListFilter {
    /// Objects owned by the given stack.
    pub fn stack(stack_id: &str) -> Self {
        Self {
            label: Some((STACK_LABEL.to_string(), stack_id.to_string())),
        }
    }

    pub fn matches(&self, labels: &std::collections::BTreeMap<String, String>) -> bool {
        match &self.label {
            Some((key, value)) => labels.get(key) == Some(value),
            None => true,
        }
    }
}

pub type SubscriptionId = u64;

/// An open event subscription.
///
/// `backlog` holds the already-logged events inside the requested window;
/// `live` receives every event emitted after the subscription was opened.
/// The live receiver is unfiltered, so consumers apply `filter` themselves.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub backlog: Vec<Event>,
    pub live: broadcast::Receiver<Event>,
    pub filter: EventFilter,
    pub until: Option<DateTime<Utc>>,
}

// =============================================================================
// Domain Backend Traits
// =============================================================================

/// Backend trait for service operations.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    async fn list_services(&self, filter: &ListFilter) -> Result<Vec<Service>>;

    async fn get_service(&self, id: &str) -> Result<Service>;

    /// Create a service, returning its ID.
    async fn create_service(&self, spec: ServiceSpec) -> Result<String>;

    /// Update a service; `version` must match the current version.
    async fn update_service(&self, id: &str, version: u64, spec: ServiceSpec) -> Result<()>;

    async fn remove_service(&self, id: &str) -> Result<()>;
}

/// Backend trait for secret operations.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn list_secrets(&self, filter: &ListFilter) -> Result<Vec<Secret>>;

    async fn get_secret(&self, id: &str) -> Result<Secret>;

    async fn create_secret(&self, spec: SecretSpec) -> Result<String>;

    async fn update_secret(&self, id: &str, version: u64, spec: SecretSpec) -> Result<()>;

    async fn remove_secret(&self, id: &str) -> Result<()>;
}

/// Backend trait for config operations.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    async fn list_configs(&self, filter: &ListFilter) -> Result<Vec<Config>>;

    async fn get_config(&self, id: &str) -> Result<Config>;

    async fn create_config(&self, spec: ConfigSpec) -> Result<String>;

    async fn update_config(&self, id: &str, version: u64, spec: ConfigSpec) -> Result<()>;

    async fn remove_config(&self, id: &str) -> Result<()>;
}

/// Backend trait for network operations. Networks cannot be updated.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    async fn list_networks(&self, filter: &ListFilter) -> Result<Vec<Network>>;

    async fn get_network(&self, id: &str) -> Result<Network>;

    async fn create_network(&self, name: &str, spec: NetworkCreate) -> Result<String>;

    async fn remove_network(&self, id: &str) -> Result<()>;
}

/// Backend trait for stacks and their reconciliation snapshots.
#[async_trait]
pub trait StackBackend: Send + Sync {
    /// Create a stack, returning its ID.
    async fn create_stack(&self, spec: StackSpec) -> Result<String>;

    async fn get_stack(&self, id: &str) -> Result<Stack>;

    async fn list_stacks(&self) -> Result<Vec<Stack>>;

    /// Replace a stack's spec; `version` must match the current version.
    async fn update_stack(&self, id: &str, spec: StackSpec, version: u64) -> Result<()>;

    async fn delete_stack(&self, id: &str) -> Result<()>;

    async fn get_snapshot_stack(&self, id: &str) -> Result<SnapshotStack>;

    /// Write a snapshot if `version` is still current. Returns the stored
    /// snapshot with its version advanced by one.
    async fn update_snapshot_stack(
        &self,
        id: &str,
        snapshot: SnapshotStack,
        version: u64,
    ) -> Result<SnapshotStack>;
}

/// Backend trait for the change-event stream.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Open a subscription. Events logged in `[since, until]` are returned as
    /// backlog; `since = None` means no backlog.
    async fn subscribe(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        filter: EventFilter,
    ) -> Result<Subscription>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

// =============================================================================
// Composite Backend Trait
// =============================================================================

/// Composite backend trait combining all domain backends.
///
/// This is the trait the reconciler holds (as `Arc<dyn Backend>`).
pub trait Backend:
    ServiceBackend + SecretBackend + ConfigBackend + NetworkBackend + StackBackend + EventBackend
{
}

impl<T> Backend for T where
    T: ServiceBackend
        + SecretBackend
        + ConfigBackend
        + NetworkBackend
        + StackBackend
        + EventBackend
{
}
