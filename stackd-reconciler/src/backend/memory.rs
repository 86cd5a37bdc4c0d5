//! In-memory substrate.
//!
//! Implements every backend trait against plain maps behind one lock. Used
//! by the binary's default run mode and by the tests, which also read its
//! mutation journal and inject failures.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::types::{
    Config, ConfigSpec, Event, EventAction, EventFilter, Meta, Network, NetworkCreate,
    ResourceKind, Secret, SecretSpec, Service, ServiceSpec, SnapshotStack, Stack, StackSpec,
};

use super::error::{BackendError, Result};
use super::traits::{
    ConfigBackend, EventBackend, ListFilter, NetworkBackend, SecretBackend, ServiceBackend,
    StackBackend, Subscription, SubscriptionId,
};

/// Capacity of the live event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Number of events kept for backlog replay.
const EVENT_HISTORY_LIMIT: usize = 1024;

/// Kind of substrate mutation recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOp {
    Create,
    Update,
    Remove,
}

/// One substrate mutation, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: ResourceKind,
    pub op: MutationOp,
    pub id: String,
    pub name: String,
}

#[derive(Default)]
struct Inner {
    services: BTreeMap<String, Service>,
    secrets: BTreeMap<String, Secret>,
    configs: BTreeMap<String, Config>,
    networks: BTreeMap<String, Network>,
    stacks: BTreeMap<String, SnapshotStack>,
    history: VecDeque<Event>,
    subscriptions: BTreeSet<SubscriptionId>,
    next_subscription: SubscriptionId,
    journal: Vec<Mutation>,
    snapshot_writes: u64,
    failures: HashMap<(ResourceKind, MutationOp), BackendError>,
}

impl Inner {
    /// Consume an injected failure for this operation, if any.
    fn take_failure(&mut self, kind: ResourceKind, op: MutationOp) -> Result<()> {
        match self.failures.remove(&(kind, op)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&mut self, kind: ResourceKind, op: MutationOp, id: &str, name: &str) {
        self.journal.push(Mutation {
            kind,
            op,
            id: id.to_string(),
            name: name.to_string(),
        });
    }
}

/// Backend keeping all substrate state in memory.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    events: broadcast::Sender<Event>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_event_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Create a backend whose live event channel holds `capacity` events
    /// before slow subscribers start lagging.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn emit(&self, inner: &mut Inner, kind: ResourceKind, action: EventAction, id: &str) {
        let event = Event::new(kind, action, id);
        inner.history.push_back(event.clone());
        if inner.history.len() > EVENT_HISTORY_LIMIT {
            inner.history.pop_front();
        }
        // No live subscribers is fine; the event is still in the history.
        let _ = self.events.send(event);
    }

    /// All substrate mutations applied so far.
    pub async fn mutations(&self) -> Vec<Mutation> {
        self.inner.lock().await.journal.clone()
    }

    /// Forget recorded mutations and snapshot writes.
    pub async fn clear_journal(&self) {
        let mut inner = self.inner.lock().await;
        inner.journal.clear();
        inner.snapshot_writes = 0;
    }

    /// Number of successful snapshot writes.
    pub async fn snapshot_writes(&self) -> u64 {
        self.inner.lock().await.snapshot_writes
    }

    /// Make the next `op` on `kind` fail with `error`.
    pub async fn fail_next(&self, kind: ResourceKind, op: MutationOp, error: BackendError) {
        self.inner.lock().await.failures.insert((kind, op), error);
    }

    /// Number of subscriptions not yet unsubscribed.
    pub async fn active_subscriptions(&self) -> usize {
        self.inner.lock().await.subscriptions.len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Reject a write that presents a stale version.
fn check_version(current: u64, presented: u64) -> Result<()> {
    if current == presented {
        Ok(())
    } else {
        Err(BackendError::VersionMismatch {
            expected: presented,
            actual: current,
        })
    }
}

#[async_trait]
impl ServiceBackend for MemoryBackend {
    async fn list_services(&self, filter: &ListFilter) -> Result<Vec<Service>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .services
            .values()
            .filter(|s| filter.matches(&s.spec.annotations.labels))
            .cloned()
            .collect())
    }

    async fn get_service(&self, id: &str) -> Result<Service> {
        let inner = self.inner.lock().await;
        inner
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(ResourceKind::Service, id))
    }

    async fn create_service(&self, spec: ServiceSpec) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Service, MutationOp::Create)?;

        let id = new_id();
        let name = spec.annotations.name.clone();
        inner.services.insert(
            id.clone(),
            Service {
                id: id.clone(),
                meta: Meta::at(1),
                spec,
            },
        );
        inner.record(ResourceKind::Service, MutationOp::Create, &id, &name);
        self.emit(&mut inner, ResourceKind::Service, EventAction::Create, &id);
        Ok(id)
    }

    async fn update_service(&self, id: &str, version: u64, spec: ServiceSpec) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Service, MutationOp::Update)?;

        let service = inner
            .services
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Service, id))?;
        check_version(service.meta.version, version)?;
        service.spec = spec;
        service.meta.version += 1;
        let name = service.spec.annotations.name.clone();

        inner.record(ResourceKind::Service, MutationOp::Update, id, &name);
        self.emit(&mut inner, ResourceKind::Service, EventAction::Update, id);
        Ok(())
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Service, MutationOp::Remove)?;

        let service = inner
            .services
            .remove(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Service, id))?;
        inner.record(
            ResourceKind::Service,
            MutationOp::Remove,
            id,
            &service.spec.annotations.name,
        );
        self.emit(&mut inner, ResourceKind::Service, EventAction::Remove, id);
        Ok(())
    }
}

#[async_trait]
impl SecretBackend for MemoryBackend {
    async fn list_secrets(&self, filter: &ListFilter) -> Result<Vec<Secret>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .secrets
            .values()
            .filter(|s| filter.matches(&s.spec.annotations.labels))
            .cloned()
            .collect())
    }

    async fn get_secret(&self, id: &str) -> Result<Secret> {
        let inner = self.inner.lock().await;
        inner
            .secrets
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(ResourceKind::Secret, id))
    }

    async fn create_secret(&self, spec: SecretSpec) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Secret, MutationOp::Create)?;

        let id = new_id();
        let name = spec.annotations.name.clone();
        inner.secrets.insert(
            id.clone(),
            Secret {
                id: id.clone(),
                meta: Meta::at(1),
                spec,
            },
        );
        inner.record(ResourceKind::Secret, MutationOp::Create, &id, &name);
        self.emit(&mut inner, ResourceKind::Secret, EventAction::Create, &id);
        Ok(id)
    }

    async fn update_secret(&self, id: &str, version: u64, spec: SecretSpec) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Secret, MutationOp::Update)?;

        let secret = inner
            .secrets
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Secret, id))?;
        check_version(secret.meta.version, version)?;
        secret.spec = spec;
        secret.meta.version += 1;
        let name = secret.spec.annotations.name.clone();

        inner.record(ResourceKind::Secret, MutationOp::Update, id, &name);
        self.emit(&mut inner, ResourceKind::Secret, EventAction::Update, id);
        Ok(())
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Secret, MutationOp::Remove)?;

        let secret = inner
            .secrets
            .remove(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Secret, id))?;
        inner.record(
            ResourceKind::Secret,
            MutationOp::Remove,
            id,
            &secret.spec.annotations.name,
        );
        self.emit(&mut inner, ResourceKind::Secret, EventAction::Remove, id);
        Ok(())
    }
}

#[async_trait]
impl ConfigBackend for MemoryBackend {
    async fn list_configs(&self, filter: &ListFilter) -> Result<Vec<Config>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .configs
            .values()
            .filter(|c| filter.matches(&c.spec.annotations.labels))
            .cloned()
            .collect())
    }

    async fn get_config(&self, id: &str) -> Result<Config> {
        let inner = self.inner.lock().await;
        inner
            .configs
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(ResourceKind::Config, id))
    }

    async fn create_config(&self, spec: ConfigSpec) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Config, MutationOp::Create)?;

        let id = new_id();
        let name = spec.annotations.name.clone();
        inner.configs.insert(
            id.clone(),
            Config {
                id: id.clone(),
                meta: Meta::at(1),
                spec,
            },
        );
        inner.record(ResourceKind::Config, MutationOp::Create, &id, &name);
        self.emit(&mut inner, ResourceKind::Config, EventAction::Create, &id);
        Ok(id)
    }

    async fn update_config(&self, id: &str, version: u64, spec: ConfigSpec) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Config, MutationOp::Update)?;

        let config = inner
            .configs
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Config, id))?;
        check_version(config.meta.version, version)?;
        config.spec = spec;
        config.meta.version += 1;
        let name = config.spec.annotations.name.clone();

        inner.record(ResourceKind::Config, MutationOp::Update, id, &name);
        self.emit(&mut inner, ResourceKind::Config, EventAction::Update, id);
        Ok(())
    }

    async fn remove_config(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Config, MutationOp::Remove)?;

        let config = inner
            .configs
            .remove(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Config, id))?;
        inner.record(
            ResourceKind::Config,
            MutationOp::Remove,
            id,
            &config.spec.annotations.name,
        );
        self.emit(&mut inner, ResourceKind::Config, EventAction::Remove, id);
        Ok(())
    }
}

#[async_trait]
impl NetworkBackend for MemoryBackend {
    async fn list_networks(&self, filter: &ListFilter) -> Result<Vec<Network>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .networks
            .values()
            .filter(|n| filter.matches(&n.spec.labels))
            .cloned()
            .collect())
    }

    async fn get_network(&self, id: &str) -> Result<Network> {
        let inner = self.inner.lock().await;
        inner
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(ResourceKind::Network, id))
    }

    async fn create_network(&self, name: &str, spec: NetworkCreate) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Network, MutationOp::Create)?;

        let id = new_id();
        inner.networks.insert(
            id.clone(),
            Network {
                id: id.clone(),
                name: name.to_string(),
                meta: Meta::at(1),
                spec,
            },
        );
        inner.record(ResourceKind::Network, MutationOp::Create, &id, name);
        self.emit(&mut inner, ResourceKind::Network, EventAction::Create, &id);
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(ResourceKind::Network, MutationOp::Remove)?;

        let network = inner
            .networks
            .remove(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Network, id))?;
        inner.record(ResourceKind::Network, MutationOp::Remove, id, &network.name);
        self.emit(&mut inner, ResourceKind::Network, EventAction::Remove, id);
        Ok(())
    }
}

#[async_trait]
impl StackBackend for MemoryBackend {
    async fn create_stack(&self, spec: StackSpec) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let id = new_id();
        inner
            .stacks
            .insert(id.clone(), SnapshotStack::new(id.clone(), spec));
        self.emit(&mut inner, ResourceKind::Stack, EventAction::Create, &id);
        Ok(id)
    }

    async fn get_stack(&self, id: &str) -> Result<Stack> {
        let inner = self.inner.lock().await;
        inner
            .stacks
            .get(id)
            .map(SnapshotStack::to_stack)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Stack, id))
    }

    async fn list_stacks(&self) -> Result<Vec<Stack>> {
        let inner = self.inner.lock().await;
        Ok(inner.stacks.values().map(SnapshotStack::to_stack).collect())
    }

    async fn update_stack(&self, id: &str, spec: StackSpec, version: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let snapshot = inner
            .stacks
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Stack, id))?;
        check_version(snapshot.meta.version, version)?;
        snapshot.name = spec.annotations.name.clone();
        snapshot.spec = spec;
        snapshot.meta.version += 1;
        self.emit(&mut inner, ResourceKind::Stack, EventAction::Update, id);
        Ok(())
    }

    async fn delete_stack(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .stacks
            .remove(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Stack, id))?;
        self.emit(&mut inner, ResourceKind::Stack, EventAction::Remove, id);
        Ok(())
    }

    async fn get_snapshot_stack(&self, id: &str) -> Result<SnapshotStack> {
        let inner = self.inner.lock().await;
        inner
            .stacks
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(ResourceKind::Stack, id))
    }

    async fn update_snapshot_stack(
        &self,
        id: &str,
        mut snapshot: SnapshotStack,
        version: u64,
    ) -> Result<SnapshotStack> {
        let mut inner = self.inner.lock().await;
        let current = inner
            .stacks
            .get(id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Stack, id))?;
        check_version(current.meta.version, version)?;

        snapshot.id = id.to_string();
        snapshot.meta.version = version + 1;
        inner.stacks.insert(id.to_string(), snapshot.clone());
        inner.snapshot_writes += 1;
        Ok(snapshot)
    }
}

#[async_trait]
impl EventBackend for MemoryBackend {
    async fn subscribe(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        filter: EventFilter,
    ) -> Result<Subscription> {
        let mut inner = self.inner.lock().await;

        let backlog = match since {
            Some(since) => inner
                .history
                .iter()
                .filter(|e| e.time >= since)
                .filter(|e| until.is_none_or(|until| e.time <= until))
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        inner.next_subscription += 1;
        let id = inner.next_subscription;
        inner.subscriptions.insert(id);
        debug!(subscription = id, backlog = backlog.len(), "subscribed to events");

        // Taken under the lock, so nothing emitted after the backlog snapshot
        // is missed by the live receiver.
        let live = self.events.subscribe();

        Ok(Subscription {
            id,
            backlog,
            live,
            filter,
            until,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.subscriptions.remove(&id) {
            debug!(subscription = id, "unsubscribe for unknown subscription");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotations, STACK_LABEL, SnapshotResource};

    fn labeled_config(name: &str, stack_id: &str) -> ConfigSpec {
        let mut annotations = Annotations::named(name);
        annotations
            .labels
            .insert(STACK_LABEL.to_string(), stack_id.to_string());
        ConfigSpec {
            annotations,
            data: b"x".to_vec(),
            templating: None,
        }
    }

    #[tokio::test]
    async fn test_config_crud() {
        let backend = MemoryBackend::new();

        let id = backend
            .create_config(labeled_config("config1", "STK_1"))
            .await
            .unwrap();
        let config = backend.get_config(&id).await.unwrap();
        assert_eq!(config.meta.version, 1);

        let mut spec = config.spec.clone();
        spec.data = b"y".to_vec();
        backend.update_config(&id, 1, spec).await.unwrap();
        let config = backend.get_config(&id).await.unwrap();
        assert_eq!(config.meta.version, 2);
        assert_eq!(config.spec.data, b"y".to_vec());

        backend.remove_config(&id).await.unwrap();
        let err = backend.get_config(&id).await.unwrap_err();
        assert!(err.is_not_found());

        let ops: Vec<_> = backend.mutations().await.into_iter().map(|m| m.op).collect();
        assert_eq!(
            ops,
            vec![MutationOp::Create, MutationOp::Update, MutationOp::Remove]
        );
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let backend = MemoryBackend::new();
        let id = backend
            .create_config(labeled_config("config1", "STK_1"))
            .await
            .unwrap();

        let err = backend
            .update_config(&id, 7, labeled_config("config1", "STK_1"))
            .await
            .unwrap_err();
        assert!(err.is_version_mismatch());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.remove_service("nope").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::NotFound {
                kind: ResourceKind::Service,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_stack_label() {
        let backend = MemoryBackend::new();
        backend
            .create_config(labeled_config("a", "STK_1"))
            .await
            .unwrap();
        backend
            .create_config(labeled_config("b", "STK_2"))
            .await
            .unwrap();
        backend
            .create_config(ConfigSpec {
                annotations: Annotations::named("c"),
                ..Default::default()
            })
            .await
            .unwrap();

        let owned = backend
            .list_configs(&ListFilter::stack("STK_1"))
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].spec.annotations.name, "a");

        let all = backend.list_configs(&ListFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_writes_are_version_checked() {
        let backend = MemoryBackend::new();
        let id = backend
            .create_stack(StackSpec::named("shop"))
            .await
            .unwrap();

        let mut snapshot = backend.get_snapshot_stack(&id).await.unwrap();
        assert_eq!(snapshot.version(), 1);

        snapshot.configs = vec![SnapshotResource::pending("config1")];
        let stored = backend
            .update_snapshot_stack(&id, snapshot.clone(), 1)
            .await
            .unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.configs.len(), 1);

        // Presenting the old version again loses.
        let err = backend
            .update_snapshot_stack(&id, snapshot, 1)
            .await
            .unwrap_err();
        assert!(err.is_version_mismatch());
        assert_eq!(backend.snapshot_writes().await, 1);
    }

    #[tokio::test]
    async fn test_update_stack_keeps_goals() {
        let backend = MemoryBackend::new();
        let id = backend
            .create_stack(StackSpec::named("shop"))
            .await
            .unwrap();
        let mut snapshot = backend.get_snapshot_stack(&id).await.unwrap();
        snapshot.secrets = vec![SnapshotResource::new("SEC_1", "db-password", 1)];
        backend
            .update_snapshot_stack(&id, snapshot, 1)
            .await
            .unwrap();

        backend
            .update_stack(&id, StackSpec::named("shop-v2"), 2)
            .await
            .unwrap();

        let snapshot = backend.get_snapshot_stack(&id).await.unwrap();
        assert_eq!(snapshot.version(), 3);
        assert_eq!(snapshot.name, "shop-v2");
        assert_eq!(snapshot.secrets.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let backend = MemoryBackend::new();
        backend
            .fail_next(
                ResourceKind::Config,
                MutationOp::Create,
                BackendError::Unavailable("substrate down".into()),
            )
            .await;

        let err = backend
            .create_config(labeled_config("config1", "STK_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));

        backend
            .create_config(labeled_config("config1", "STK_1"))
            .await
            .unwrap();
        assert_eq!(backend.mutations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_backlog_and_live() {
        let backend = MemoryBackend::new();
        let start = Utc::now();
        let stack_id = backend
            .create_stack(StackSpec::named("shop"))
            .await
            .unwrap();
        backend
            .create_config(labeled_config("config1", &stack_id))
            .await
            .unwrap();

        let mut subscription = backend
            .subscribe(
                Some(start),
                None,
                EventFilter::kinds([ResourceKind::Stack]),
            )
            .await
            .unwrap();
        assert_eq!(subscription.backlog.len(), 1);
        assert_eq!(subscription.backlog[0].resource_id(), stack_id);
        assert_eq!(backend.active_subscriptions().await, 1);

        backend.delete_stack(&stack_id).await.unwrap();
        let event = subscription.live.recv().await.unwrap();
        assert_eq!(event.kind, ResourceKind::Stack);
        assert_eq!(event.action, EventAction::Remove);

        backend.unsubscribe(subscription.id).await.unwrap();
        assert_eq!(backend.active_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_without_since_has_no_backlog() {
        let backend = MemoryBackend::new();
        backend
            .create_stack(StackSpec::named("shop"))
            .await
            .unwrap();

        let subscription = backend
            .subscribe(None, None, EventFilter::all())
            .await
            .unwrap();
        assert!(subscription.backlog.is_empty());
    }
}
