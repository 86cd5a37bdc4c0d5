//! Backend abstraction over the orchestration substrate.
//!
//! The reconciler only ever talks to `Arc<dyn Backend>`; which cluster
//! manager sits behind it is not its concern.
//!
//! # Architecture
//!
//! ```text
//! reconciler → Arc<dyn Backend>
//!                   ↓
//!             backend.list_configs(&ListFilter::stack(id))   // live state
//!             backend.update_snapshot_stack(id, snap, ver)   // goal state
//! ```
//!
//! [`MemoryBackend`] implements every trait in-process.

mod error;
mod memory;
mod traits;

pub use error::{BackendError, Result};
pub use memory::{MemoryBackend, Mutation, MutationOp};
pub use traits::*;
