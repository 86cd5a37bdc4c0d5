//! Desired-state types: the stack spec and the per-kind specs it carries.
//!
//! These mirror the substrate's own create/update payloads closely enough
//! that a plugin can hand them to the backend unchanged (plus the ownership
//! label).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::kind::STACK_LABEL;

/// Name and labels of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Annotations {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    /// The owning stack ID, if the ownership label is set and non-empty.
    pub fn stack_id(&self) -> Option<&str> {
        stack_label(&self.labels)
    }

    /// Copy of these annotations with the ownership label removed.
    pub fn without_stack_label(&self) -> Self {
        Self {
            name: self.name.clone(),
            labels: strip_stack_label(&self.labels),
        }
    }
}

/// Read the ownership label from a label map.
pub fn stack_label(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels
        .get(STACK_LABEL)
        .map(String::as_str)
        .filter(|id| !id.is_empty())
}

/// Copy of a label map without the ownership label.
pub fn strip_stack_label(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| key.as_str() != STACK_LABEL)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// =============================================================================
// Services
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub annotations: Annotations,
    #[serde(default)]
    pub task_template: TaskSpec,
    #[serde(default)]
    pub mode: ServiceMode,
    #[serde(default)]
    pub endpoint: EndpointSpec,
}

/// What each task of a service runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    /// Secret names mounted into the task.
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Config names mounted into the task.
    #[serde(default)]
    pub configs: Vec<String>,
    /// Network names the task attaches to.
    #[serde(default)]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    Replicated { replicas: u64 },
    Global,
}

impl Default for ServiceMode {
    fn default() -> Self {
        ServiceMode::Replicated { replicas: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub target_port: u16,
    pub published_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

// =============================================================================
// Secrets and configs
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub annotations: Annotations,
    #[serde(default)]
    pub data: Vec<u8>,
    /// External secret driver, if the value is not stored by the substrate.
    #[serde(default)]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSpec {
    pub annotations: Annotations,
    #[serde(default)]
    pub data: Vec<u8>,
    /// Templating driver applied to the config data, if any.
    #[serde(default)]
    pub templating: Option<String>,
}

// =============================================================================
// Networks
// =============================================================================

/// Network creation options. Networks are keyed by name in a stack spec, so
/// the name is not part of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCreate {
    #[serde(default = "default_network_driver")]
    pub driver: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub attachable: bool,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_network_driver() -> String {
    "overlay".to_string()
}

impl Default for NetworkCreate {
    fn default() -> Self {
        Self {
            driver: default_network_driver(),
            internal: false,
            attachable: false,
            subnets: Vec::new(),
            options: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Stack
// =============================================================================

/// Desired state of a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    pub annotations: Annotations,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub secrets: Vec<SecretSpec>,
    #[serde(default)]
    pub configs: Vec<ConfigSpec>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkCreate>,
}

impl StackSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            annotations: Annotations::named(name),
            ..Default::default()
        }
    }

    /// Total number of sub-resources the spec asks for.
    pub fn resource_count(&self) -> usize {
        self.services.len() + self.secrets.len() + self.configs.len() + self.networks.len()
    }
}
