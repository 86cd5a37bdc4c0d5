//! Object kinds known to the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Label key carried by every substrate resource a stack owns.
///
/// The value is the owning stack's ID.
pub const STACK_LABEL: &str = "com.docker.stacks.stack_id";

/// Kind of object an event or reconcile request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Stack,
    Service,
    Secret,
    Config,
    Network,
}

impl ResourceKind {
    /// All kinds, stack first.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Stack,
        ResourceKind::Service,
        ResourceKind::Secret,
        ResourceKind::Config,
        ResourceKind::Network,
    ];

    /// Sub-resource kinds in the order a stack pass converges them.
    ///
    /// Services reference the other three, so they go last.
    pub const CONVERGENCE_ORDER: [ResourceKind; 4] = [
        ResourceKind::Secret,
        ResourceKind::Config,
        ResourceKind::Network,
        ResourceKind::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Stack => "stack",
            ResourceKind::Service => "service",
            ResourceKind::Secret => "secret",
            ResourceKind::Config => "config",
            ResourceKind::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}
