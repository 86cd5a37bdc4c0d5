//! Change events emitted by the backend.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kind::ResourceKind;

/// What happened to the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Update,
    Remove,
}

/// The object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
}

/// A change to one substrate object.
///
/// Only the kind and actor ID matter for scheduling; the action and time are
/// kept for logging and backlog windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub action: EventAction,
    pub actor: Actor,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: ResourceKind, action: EventAction, id: impl Into<String>) -> Self {
        Self {
            kind,
            action,
            actor: Actor { id: id.into() },
            time: Utc::now(),
        }
    }

    /// Get the ID of the object this event refers to.
    pub fn resource_id(&self) -> &str {
        &self.actor.id
    }
}

/// Selects which events a subscription receives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Kinds to receive. Empty means every kind.
    #[serde(default)]
    pub kinds: BTreeSet<ResourceKind>,
}

impl EventFilter {
    /// Filter matching every kind the reconciler cares about.
    pub fn all() -> Self {
        Self {
            kinds: ResourceKind::ALL.into_iter().collect(),
        }
    }

    pub fn kinds(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&event.kind)
    }
}
