//! Domain types shared by the backend and the reconciler.

mod event;
mod kind;
mod live;
mod snapshot;
mod spec;

pub use event::{Actor, Event, EventAction, EventFilter};
pub use kind::{ResourceKind, STACK_LABEL};
pub use live::{ActiveResource, Config, Network, Secret, Service};
pub use snapshot::{Meta, SnapshotResource, SnapshotStack, Stack};
pub use spec::{
    Annotations, ConfigSpec, EndpointSpec, NetworkCreate, PortConfig, SecretSpec, ServiceMode,
    ServiceSpec, StackSpec, TaskSpec, stack_label, strip_stack_label,
};
