pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod notifier;
pub mod reconciler;
pub mod types;

pub use backend::{Backend, BackendError, MemoryBackend};
pub use config::{ConfigError, EngineConfig, load_stack_spec};
pub use dispatcher::{Dispatcher, ObjectKey, PendingSet};
pub use manager::{Manager, ManagerError};
pub use notifier::ObjectChangeNotifier;
pub use reconciler::{ReconcileError, ReconcileRequest, Reconciler, StackReconciler};
pub use types::{Event, ResourceKind, SnapshotStack, StackSpec};
