//! Change notification seam between event producers and the dispatcher.

use crate::types::ResourceKind;

/// Receives "this object may have changed" hints.
///
/// Implementations must be cheap and non-blocking; callers notify from inside
/// reconciliation passes.
pub trait ObjectChangeNotifier: Send + Sync {
    fn notify(&self, kind: ResourceKind, id: &str);
}
