//! Event dispatcher.
//!
//! Turns the change-event stream into reconcile calls, one object at a time.
//! Events only mark an object as pending; duplicates collapse until the
//! object is reconciled, so a burst of N events about the same stack costs a
//! single pass.
//!
//! ```text
//!              event                         nothing ready
//!   WaitingForRead ───────────▶ ReadingEvents ──────────────▶ reconcile one
//!        ▲                          │   ▲                         │
//!        └──── pending empty ───────┘   └─────────────────────────┘
//! ```
//!
//! Draining ready events always wins over reconciling. A closed channel ends
//! the loop immediately.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::notifier::ObjectChangeNotifier;
use crate::reconciler::{ReconcileRequest, Reconciler};
use crate::types::{Event, ResourceKind};

/// Delay before retrying after a failed reconcile when no events are ready.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Identity of a pending object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub id: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

#[derive(Default)]
struct Queue {
    order: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
}

/// FIFO set of objects waiting to be reconciled.
#[derive(Default)]
pub struct PendingSet {
    queue: Mutex<Queue>,
    wake: Notify,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` unless it is already waiting. Returns whether it was new.
    pub fn insert(&self, key: ObjectKey) -> bool {
        let inserted = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.queued.insert(key.clone()) {
                queue.order.push_back(key);
                true
            } else {
                false
            }
        };
        if inserted {
            self.wake.notify_one();
        }
        inserted
    }

    pub fn pop(&self) -> Option<ObjectKey> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let key = queue.order.pop_front()?;
        queue.queued.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once something has been inserted since the last wake-up.
    async fn notified(&self) {
        self.wake.notified().await
    }
}

impl ObjectChangeNotifier for PendingSet {
    fn notify(&self, kind: ResourceKind, id: &str) {
        if self.insert(ObjectKey::new(kind, id)) {
            debug!(kind = %kind, id = %id, "object queued");
        }
    }
}

enum State {
    WaitingForRead,
    ReadingEvents,
    /// Last reconcile failed; wait for an event or the backoff to elapse.
    BackingOff,
}

pub struct Dispatcher {
    reconciler: Arc<dyn Reconciler>,
    pending: Arc<PendingSet>,
    retry_backoff: Duration,
}

impl Dispatcher {
    pub fn new(reconciler: Arc<dyn Reconciler>, pending: Arc<PendingSet>) -> Self {
        Self {
            reconciler,
            pending,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Notifier feeding this dispatcher's pending set.
    pub fn notifier(&self) -> Arc<dyn ObjectChangeNotifier> {
        self.pending.clone()
    }

    pub fn notify(&self, kind: ResourceKind, id: &str) {
        self.pending.notify(kind, id);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Run until `events` is closed.
    pub async fn handle_events(&self, mut events: mpsc::Receiver<Event>) {
        let mut state = State::WaitingForRead;

        loop {
            state = match state {
                State::WaitingForRead => {
                    tokio::select! {
                        biased;
                        event = events.recv() => match event {
                            Some(event) => {
                                self.route(&event);
                                State::ReadingEvents
                            }
                            None => break,
                        },
                        _ = self.pending.notified() => State::ReadingEvents,
                    }
                }
                State::BackingOff => {
                    tokio::select! {
                        biased;
                        event = events.recv() => match event {
                            Some(event) => {
                                self.route(&event);
                                State::ReadingEvents
                            }
                            None => break,
                        },
                        _ = tokio::time::sleep(self.retry_backoff) => State::ReadingEvents,
                    }
                }
                State::ReadingEvents => match events.try_recv() {
                    Ok(event) => {
                        self.route(&event);
                        State::ReadingEvents
                    }
                    Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => match self.pending.pop() {
                        Some(key) => {
                            if self.reconcile(key).await {
                                State::ReadingEvents
                            } else {
                                State::BackingOff
                            }
                        }
                        None => State::WaitingForRead,
                    },
                },
            };
        }

        info!(pending = self.pending.len(), "event channel closed, dispatcher stopped");
    }

    fn route(&self, event: &Event) {
        debug!(
            kind = %event.kind,
            id = %event.resource_id(),
            action = ?event.action,
            "event received"
        );
        self.pending.notify(event.kind, event.resource_id());
    }

    /// Reconcile one object, requeueing it on failure. Returns whether the
    /// reconcile succeeded.
    async fn reconcile(&self, key: ObjectKey) -> bool {
        let request = ReconcileRequest::new(key.kind, key.id.clone());
        match self.reconciler.reconcile(&request).await {
            Ok(()) => true,
            Err(err) => {
                warn!(kind = %key.kind, id = %key.id, error = %err, "reconcile failed, requeueing");
                self.pending.insert(key);
                false
            }
        }
    }
}
