//! Mark-and-converge pass for one resource kind of one stack.
//!
//! A pass runs in four marking phases and then mutates:
//!
//! 1. Seed: every goal entry is marked `Delete` (or `Skip` if the caller
//!    asked for it).
//! 2. Match desired: entries the spec still names become `Compare`; names
//!    with no goal entry become `Create`.
//! 3. Live state: active resources labelled for the stack are matched by
//!    name. Matches absorb the live ID and version and are compared; unmatched
//!    ones become orphans marked `Delete`.
//! 4. Residual: a `Compare` that never met a live resource is re-created.
//!    Its recorded ID is kept until the re-create has removed the old object.
//!
//! Before any substrate call the new goal list is committed with a
//! version-checked snapshot write. If another engine got there first the
//! write fails and the pass aborts without touching the substrate.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::notifier::ObjectChangeNotifier;
use crate::types::{ActiveResource, ResourceKind, SnapshotResource, SnapshotStack};

use super::error::{ReconcileError, Result};
use super::plugin::ResourcePlugin;
use super::resource::{Mark, ReconcileResource};

/// Converges a single kind. Object-safe so the stack reconciler can hold a
/// list of them.
#[async_trait]
pub trait KindReconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Run one pass, returning the snapshot as last stored.
    async fn reconcile(&self, snapshot: SnapshotStack) -> Result<SnapshotStack>;
}

pub struct Algorithm<P: ResourcePlugin> {
    plugin: P,
    notifier: Arc<dyn ObjectChangeNotifier>,
    /// Goal IDs to leave untouched this pass.
    skip: BTreeSet<String>,
}

impl<P: ResourcePlugin> Algorithm<P> {
    pub fn new(plugin: P, notifier: Arc<dyn ObjectChangeNotifier>) -> Self {
        Self {
            plugin,
            notifier,
            skip: BTreeSet::new(),
        }
    }

    pub fn with_skipped(mut self, skip: BTreeSet<String>) -> Self {
        self.skip = skip;
        self
    }

    fn seed(&self, snapshot: &SnapshotStack) -> Vec<ReconcileResource<P::Spec>> {
        snapshot
            .goals(P::KIND)
            .iter()
            .map(|goal| {
                let mark = if self.skip.contains(&goal.id) {
                    self.notifier.notify(P::KIND, &goal.id);
                    Mark::Skip
                } else {
                    Mark::Delete
                };
                ReconcileResource::from_goal(goal.clone(), mark, P::KIND, &snapshot.id)
            })
            .collect()
    }

    fn match_desired(
        &self,
        snapshot: &SnapshotStack,
        resources: &mut Vec<ReconcileResource<P::Spec>>,
    ) {
        let mut seen = BTreeSet::new();
        for (name, spec) in self.plugin.desired(&snapshot.spec) {
            if !seen.insert(name.clone()) {
                warn!(
                    kind = %P::KIND,
                    stack_id = %snapshot.id,
                    name = %name,
                    "duplicate name in stack spec, ignoring"
                );
                continue;
            }

            match resources.iter_mut().find(|r| r.name() == name) {
                Some(resource) => {
                    if resource.mark == Mark::Delete {
                        resource.mark = Mark::Compare;
                    }
                    resource.config = Some(spec);
                }
                None => {
                    let resource = ReconcileResource::to_create(name, spec, P::KIND, &snapshot.id);
                    resources.push(resource);
                }
            }
        }
    }

    fn match_live(
        &self,
        stack_id: &str,
        resources: &mut Vec<ReconcileResource<P::Spec>>,
        active: &[P::Active],
    ) {
        let mut claimed = vec![false; resources.len()];
        let mut orphans = Vec::new();

        for live in active {
            if live.stack_id() != Some(stack_id) {
                continue;
            }

            let slot = resources
                .iter()
                .zip(claimed.iter())
                .position(|(r, taken)| !taken && r.name() == live.name());
            let Some(index) = slot else {
                debug!(
                    kind = %P::KIND,
                    stack_id = %stack_id,
                    id = %live.id(),
                    name = %live.name(),
                    "orphaned resource"
                );
                orphans.push(ReconcileResource::orphan(live, P::KIND, stack_id));
                continue;
            };
            claimed[index] = true;

            let resource = &mut resources[index];
            match resource.mark {
                Mark::Delete => resource.absorb(live),
                Mark::Create | Mark::Compare => {
                    resource.absorb(live);
                    let same = resource
                        .config
                        .as_ref()
                        .is_some_and(|spec| self.plugin.has_same_configuration(spec, live));
                    resource.mark = if same { Mark::Same } else { Mark::Update };
                }
                Mark::Skip | Mark::Same | Mark::Update => {}
            }
        }

        resources.extend(orphans);
    }

    /// Re-mark every unresolved `Compare` as `Create`. A recorded ID stays in
    /// place so the old object is removed before its replacement is created.
    fn resolve_residual(&self, stack_id: &str, resources: &mut [ReconcileResource<P::Spec>]) {
        for resource in resources.iter_mut().filter(|r| r.mark == Mark::Compare) {
            if !resource.id().is_empty() {
                debug!(
                    kind = %P::KIND,
                    stack_id = %stack_id,
                    id = %resource.id(),
                    name = %resource.name(),
                    "recorded resource not found live, re-creating"
                );
            }
            resource.mark = Mark::Create;
        }
    }

    fn goal_list(resources: &[ReconcileResource<P::Spec>]) -> Vec<SnapshotResource> {
        resources
            .iter()
            .filter(|r| r.mark != Mark::Delete)
            .map(|r| r.resource.clone())
            .collect()
    }

    async fn apply(&self, resource: &mut ReconcileResource<P::Spec>) -> Result<()> {
        match resource.mark {
            Mark::Create => {
                if !resource.id().is_empty() {
                    // Recorded but no longer labelled for the stack.
                    self.plugin.delete_resource(resource).await?;
                }
                self.plugin.create_resource(resource).await?;
                self.refresh(resource).await
            }
            Mark::Update => {
                self.plugin.update_resource(resource).await?;
                self.refresh(resource).await
            }
            Mark::Delete => self.plugin.delete_resource(resource).await,
            Mark::Same | Mark::Skip => Ok(()),
            Mark::Compare => Err(ReconcileError::UnresolvedMark {
                kind: resource.kind,
                name: resource.name().to_string(),
                mark: resource.mark,
            }),
        }
    }

    /// Record the version the substrate assigned after a write.
    async fn refresh(&self, resource: &mut ReconcileResource<P::Spec>) -> Result<()> {
        let live = self.plugin.get_active_resource(resource.id()).await?;
        resource.absorb(&live);
        Ok(())
    }
}

/// Goal lists match by ID and name; versions are refreshed from live state
/// every pass and do not count as a change.
fn same_identities(a: &[SnapshotResource], b: &[SnapshotResource]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id && x.name == y.name)
}

#[async_trait]
impl<P: ResourcePlugin> KindReconciler for Algorithm<P> {
    fn kind(&self) -> ResourceKind {
        P::KIND
    }

    async fn reconcile(&self, snapshot: SnapshotStack) -> Result<SnapshotStack> {
        let stack_id = snapshot.id.clone();

        let mut resources = self.seed(&snapshot);
        self.match_desired(&snapshot, &mut resources);

        let active = self.plugin.get_active_resources(&stack_id).await?;
        self.match_live(&stack_id, &mut resources, &active);

        self.resolve_residual(&stack_id, &mut resources);

        let goals = Self::goal_list(&resources);
        let converged = resources
            .iter()
            .all(|r| matches!(r.mark, Mark::Same | Mark::Skip))
            && same_identities(&goals, snapshot.goals(P::KIND));
        if converged {
            debug!(kind = %P::KIND, stack_id = %stack_id, "already converged");
            return Ok(snapshot);
        }

        // Balking guard: record intent before touching the substrate.
        let mut snapshot = self.plugin.store_goals(snapshot, goals).await?;

        let pending = resources.iter().filter(|r| r.mark.is_mutation()).count();
        info!(kind = %P::KIND, stack_id = %stack_id, mutations = pending, "converging");

        for index in 0..resources.len() {
            let mark = resources[index].mark;
            if !mark.is_mutation() && mark != Mark::Compare {
                continue;
            }

            self.apply(&mut resources[index]).await?;
            debug!(
                kind = %P::KIND,
                stack_id = %stack_id,
                name = %resources[index].name(),
                id = %resources[index].id(),
                mark = ?mark,
                "applied"
            );
            resources[index].mark = match mark {
                Mark::Delete => Mark::Delete,
                _ => Mark::Same,
            };

            snapshot = self
                .plugin
                .store_goals(snapshot, Self::goal_list(&resources))
                .await?;
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::backend::{BackendError, ConfigBackend, MemoryBackend, MutationOp, StackBackend};
    use crate::reconciler::plugins::{ConfigPlugin, NetworkPlugin};
    use crate::types::{Annotations, ConfigSpec, NetworkCreate, STACK_LABEL, StackSpec};

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<(ResourceKind, String)>>,
    }

    impl RecordingNotifier {
        fn seen(&self) -> Vec<(ResourceKind, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ObjectChangeNotifier for RecordingNotifier {
        fn notify(&self, kind: ResourceKind, id: &str) {
            self.seen.lock().unwrap().push((kind, id.to_string()));
        }
    }

    fn config(name: &str, data: &[u8]) -> ConfigSpec {
        ConfigSpec {
            annotations: Annotations::named(name),
            data: data.to_vec(),
            templating: None,
        }
    }

    fn labeled(mut spec: ConfigSpec, stack_id: &str) -> ConfigSpec {
        spec.annotations
            .labels
            .insert(STACK_LABEL.to_string(), stack_id.to_string());
        spec
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        notifier: Arc<RecordingNotifier>,
        stack_id: String,
    }

    impl Fixture {
        async fn new(configs: Vec<ConfigSpec>) -> Self {
            let backend = Arc::new(MemoryBackend::new());
            let mut spec = StackSpec::named("app");
            spec.configs = configs;
            let stack_id = backend.create_stack(spec).await.unwrap();
            Self {
                backend,
                notifier: Arc::new(RecordingNotifier::default()),
                stack_id,
            }
        }

        fn configs(&self) -> Algorithm<ConfigPlugin> {
            Algorithm::new(ConfigPlugin::new(self.backend.clone()), self.notifier.clone())
        }

        async fn snapshot(&self) -> SnapshotStack {
            self.backend.get_snapshot_stack(&self.stack_id).await.unwrap()
        }

        async fn set_configs(&self, configs: Vec<ConfigSpec>) {
            let stack = self.backend.get_stack(&self.stack_id).await.unwrap();
            let mut spec = stack.spec;
            spec.configs = configs;
            self.backend
                .update_stack(&self.stack_id, spec, stack.meta.version)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_converges_from_empty() {
        let fx = Fixture::new(vec![config("config1", b"a"), config("config2", b"b")]).await;

        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        assert_eq!(snapshot.configs.len(), 2);
        assert!(snapshot.configs.iter().all(|g| !g.id.is_empty()));

        let live = fx.backend.list_configs(&Default::default()).await.unwrap();
        assert_eq!(live.len(), 2);
        for config in &live {
            assert_eq!(config.spec.annotations.labels[STACK_LABEL], fx.stack_id);
        }
        assert_eq!(fx.backend.snapshot_writes().await, 3);
        assert_eq!(fx.snapshot().await, snapshot);
        for goal in &snapshot.configs {
            let live = fx.backend.get_config(&goal.id).await.unwrap();
            assert_eq!(goal.meta.version, live.meta.version);
        }
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        fx.configs().reconcile(fx.snapshot().await).await.unwrap();
        fx.backend.clear_journal().await;

        let before = fx.snapshot().await;
        let after = fx.configs().reconcile(before.clone()).await.unwrap();

        assert_eq!(before, after);
        assert!(fx.backend.mutations().await.is_empty());
        assert_eq!(fx.backend.snapshot_writes().await, 0);
    }

    #[tokio::test]
    async fn test_changed_spec_updates_in_place() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        fx.configs().reconcile(fx.snapshot().await).await.unwrap();
        let id = fx.snapshot().await.configs[0].id.clone();

        fx.set_configs(vec![config("config1", b"b")]).await;
        fx.backend.clear_journal().await;
        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        let mutations = fx.backend.mutations().await;
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].op, MutationOp::Update);
        assert_eq!(mutations[0].id, id);
        let live = fx.backend.get_config(&id).await.unwrap();
        assert_eq!(live.spec.data, b"b".to_vec());
        assert_eq!(live.meta.version, 2);
        assert_eq!(snapshot.configs[0].meta.version, 2);
    }

    #[tokio::test]
    async fn test_removed_from_spec_is_deleted() {
        let fx = Fixture::new(vec![config("config1", b"a"), config("config2", b"b")]).await;
        fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        fx.set_configs(vec![config("config1", b"a")]).await;
        fx.backend.clear_journal().await;
        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        let mutations = fx.backend.mutations().await;
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].op, MutationOp::Remove);
        assert_eq!(mutations[0].name, "config2");
        assert_eq!(snapshot.configs.len(), 1);
        assert_eq!(snapshot.configs[0].name, "config1");
    }

    #[tokio::test]
    async fn test_orphan_is_deleted() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        let orphan = fx
            .backend
            .create_config(labeled(config("leftover", b"x"), &fx.stack_id))
            .await
            .unwrap();

        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        assert!(fx.backend.get_config(&orphan).await.unwrap_err().is_not_found());
        assert_eq!(snapshot.configs.len(), 1);
        assert_eq!(snapshot.configs[0].name, "config1");
    }

    #[tokio::test]
    async fn test_unlabeled_resource_is_not_adopted() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        let foreign = fx.backend.create_config(config("config1", b"a")).await.unwrap();

        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        assert_ne!(snapshot.configs[0].id, foreign);
        assert_eq!(fx.backend.list_configs(&Default::default()).await.unwrap().len(), 2);
        assert!(fx.backend.get_config(&foreign).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_creator_is_adopted() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        let existing = fx
            .backend
            .create_config(labeled(config("config1", b"a"), &fx.stack_id))
            .await
            .unwrap();
        fx.backend.clear_journal().await;

        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        assert!(fx.backend.mutations().await.is_empty());
        assert_eq!(snapshot.configs[0].id, existing);
    }

    #[tokio::test]
    async fn test_goal_conflict_aborts_before_mutating() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        let stale = fx.snapshot().await;

        // Someone else advances the stack version after we read it.
        fx.set_configs(vec![config("config1", b"a"), config("config2", b"b")]).await;

        let err = fx.configs().reconcile(stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(fx.backend.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_live_resource_is_recreated() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        fx.configs().reconcile(fx.snapshot().await).await.unwrap();
        let old = fx.snapshot().await.configs[0].id.clone();

        // Deleted behind our back.
        fx.backend.remove_config(&old).await.unwrap();
        fx.backend.clear_journal().await;

        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        let mutations = fx.backend.mutations().await;
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].op, MutationOp::Create);
        assert_ne!(snapshot.configs[0].id, old);
        assert!(fx.notifier.seen().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stale_delete_keeps_id_recorded() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        fx.configs().reconcile(fx.snapshot().await).await.unwrap();
        let old = fx.snapshot().await.configs[0].id.clone();

        // The ownership label is stripped out of band, so the recorded object
        // no longer shows up among the stack's live configs.
        let live = fx.backend.get_config(&old).await.unwrap();
        fx.backend
            .update_config(&old, live.meta.version, config("config1", b"a"))
            .await
            .unwrap();
        fx.backend
            .fail_next(
                ResourceKind::Config,
                MutationOp::Remove,
                BackendError::Unavailable("substrate down".to_string()),
            )
            .await;
        fx.backend.clear_journal().await;

        let err = fx.configs().reconcile(fx.snapshot().await).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Backend(BackendError::Unavailable(_))));
        assert!(fx.backend.mutations().await.is_empty());
        assert_eq!(fx.snapshot().await.configs[0].id, old);

        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();
        assert!(fx.backend.get_config(&old).await.unwrap_err().is_not_found());
        assert_ne!(snapshot.configs[0].id, old);
        let ops: Vec<MutationOp> = fx.backend.mutations().await.iter().map(|m| m.op).collect();
        assert_eq!(ops, vec![MutationOp::Remove, MutationOp::Create]);
        assert!(fx.notifier.seen().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_goal_is_left_alone_and_notified() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        fx.configs().reconcile(fx.snapshot().await).await.unwrap();
        let id = fx.snapshot().await.configs[0].id.clone();

        fx.set_configs(vec![]).await;
        fx.backend.clear_journal().await;

        let algorithm = fx.configs().with_skipped(BTreeSet::from([id.clone()]));
        algorithm.reconcile(fx.snapshot().await).await.unwrap();

        assert!(fx.backend.mutations().await.is_empty());
        assert!(fx.backend.get_config(&id).await.is_ok());
        assert_eq!(fx.notifier.seen(), vec![(ResourceKind::Config, id)]);
    }

    #[tokio::test]
    async fn test_first_mutation_error_aborts_pass() {
        let fx = Fixture::new(vec![config("config1", b"a"), config("config2", b"b")]).await;
        fx.backend
            .fail_next(
                ResourceKind::Config,
                MutationOp::Create,
                BackendError::Unavailable("substrate down".to_string()),
            )
            .await;

        let err = fx.configs().reconcile(fx.snapshot().await).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Backend(BackendError::Unavailable(_))));
        assert!(fx.backend.mutations().await.is_empty());

        // Intent was recorded before the failure; a retry finishes the job.
        assert_eq!(fx.snapshot().await.configs.len(), 2);
        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();
        assert!(snapshot.configs.iter().all(|g| !g.id.is_empty()));
        assert_eq!(fx.backend.mutations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_live_names_keep_first() {
        let fx = Fixture::new(vec![config("config1", b"a")]).await;
        let first = fx
            .backend
            .create_config(labeled(config("config1", b"a"), &fx.stack_id))
            .await
            .unwrap();
        let second = fx
            .backend
            .create_config(labeled(config("config1", b"a"), &fx.stack_id))
            .await
            .unwrap();

        let snapshot = fx.configs().reconcile(fx.snapshot().await).await.unwrap();

        let kept = &snapshot.configs[0].id;
        assert!(kept == &first || kept == &second);
        let live = fx.backend.list_configs(&Default::default()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(&live[0].id, kept);
    }

    #[tokio::test]
    async fn test_network_spec_change_costs_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let mut spec = StackSpec::named("app");
        spec.networks.insert("frontend".to_string(), NetworkCreate::default());
        let stack_id = backend.create_stack(spec.clone()).await.unwrap();
        let notifier: Arc<dyn ObjectChangeNotifier> = Arc::new(RecordingNotifier::default());
        let networks = Algorithm::new(NetworkPlugin::new(backend.clone()), notifier);

        let snapshot = backend.get_snapshot_stack(&stack_id).await.unwrap();
        networks.reconcile(snapshot).await.unwrap();

        spec.networks.insert(
            "frontend".to_string(),
            NetworkCreate {
                internal: true,
                ..Default::default()
            },
        );
        let version = backend.get_stack(&stack_id).await.unwrap().meta.version;
        backend.update_stack(&stack_id, spec, version).await.unwrap();
        backend.clear_journal().await;

        let snapshot = backend.get_snapshot_stack(&stack_id).await.unwrap();
        networks.reconcile(snapshot).await.unwrap();
        assert!(backend.mutations().await.is_empty());
    }
}
