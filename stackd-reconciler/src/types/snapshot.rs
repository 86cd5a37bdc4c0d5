//! Reconciliation bookkeeping persisted per stack.

use serde::{Deserialize, Serialize};

use super::kind::ResourceKind;
use super::spec::StackSpec;

/// Object version used for optimistic concurrency control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meta {
    pub version: u64,
}

impl Meta {
    pub fn at(version: u64) -> Self {
        Self { version }
    }
}

/// Identity and version of one concrete substrate resource.
///
/// Presence in a [`SnapshotStack`] goal list means the engine created, and
/// owns, that resource for the stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResource {
    /// Substrate ID. Empty while the resource is intended but not yet created.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub meta: Meta,
}

impl SnapshotResource {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta: Meta::at(version),
        }
    }

    /// A goal entry for a resource that does not exist yet.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            meta: Meta::default(),
        }
    }
}

/// Durable reconciliation record for one stack: its spec plus the goal
/// resource lists the engine last committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStack {
    pub id: String,
    pub name: String,
    pub meta: Meta,
    pub spec: StackSpec,
    #[serde(default)]
    pub services: Vec<SnapshotResource>,
    #[serde(default)]
    pub secrets: Vec<SnapshotResource>,
    #[serde(default)]
    pub configs: Vec<SnapshotResource>,
    #[serde(default)]
    pub networks: Vec<SnapshotResource>,
}

impl SnapshotStack {
    pub fn new(id: impl Into<String>, spec: StackSpec) -> Self {
        Self {
            id: id.into(),
            name: spec.annotations.name.clone(),
            meta: Meta::at(1),
            spec,
            ..Default::default()
        }
    }

    pub fn version(&self) -> u64 {
        self.meta.version
    }

    /// Goal list for a sub-resource kind. The stack kind has none.
    pub fn goals(&self, kind: ResourceKind) -> &[SnapshotResource] {
        match kind {
            ResourceKind::Service => &self.services,
            ResourceKind::Secret => &self.secrets,
            ResourceKind::Config => &self.configs,
            ResourceKind::Network => &self.networks,
            ResourceKind::Stack => &[],
        }
    }

    /// Replace the goal list for a sub-resource kind.
    pub fn set_goals(&mut self, kind: ResourceKind, goals: Vec<SnapshotResource>) {
        match kind {
            ResourceKind::Service => self.services = goals,
            ResourceKind::Secret => self.secrets = goals,
            ResourceKind::Config => self.configs = goals,
            ResourceKind::Network => self.networks = goals,
            ResourceKind::Stack => {}
        }
    }

    /// Total number of goal entries across all kinds.
    pub fn goal_count(&self) -> usize {
        self.services.len() + self.secrets.len() + self.configs.len() + self.networks.len()
    }

    /// User-facing view of the stack.
    pub fn to_stack(&self) -> Stack {
        Stack {
            id: self.id.clone(),
            meta: self.meta,
            spec: self.spec.clone(),
        }
    }
}

/// A stack as seen by its owner: identity, version and desired spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub id: String,
    pub meta: Meta,
    pub spec: StackSpec,
}
