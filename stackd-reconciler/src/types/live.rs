//! Live views of substrate objects, as returned by the backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::snapshot::Meta;
use super::spec::{ConfigSpec, NetworkCreate, SecretSpec, ServiceSpec, stack_label};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub meta: Meta,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub meta: Meta,
    pub spec: SecretSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub id: String,
    pub meta: Meta,
    pub spec: ConfigSpec,
}

/// A network. Networks have no update path, so the version never moves past
/// its creation value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub meta: Meta,
    pub spec: NetworkCreate,
}

/// Common accessors over the live views, used by the reconciliation
/// algorithm without knowing the concrete kind.
pub trait ActiveResource: Clone + Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> u64;
    fn labels(&self) -> &BTreeMap<String, String>;

    /// The stack owning this resource, or `None` when unlabeled.
    fn stack_id(&self) -> Option<&str> {
        stack_label(self.labels())
    }
}

impl ActiveResource for Service {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.spec.annotations.name
    }

    fn version(&self) -> u64 {
        self.meta.version
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.spec.annotations.labels
    }
}

impl ActiveResource for Secret {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.spec.annotations.name
    }

    fn version(&self) -> u64 {
        self.meta.version
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.spec.annotations.labels
    }
}

impl ActiveResource for Config {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.spec.annotations.name
    }

    fn version(&self) -> u64 {
        self.meta.version
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.spec.annotations.labels
    }
}

impl ActiveResource for Network {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.meta.version
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.spec.labels
    }
}
