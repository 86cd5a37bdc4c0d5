//! Engine wiring: event relay, resync producer and dispatcher.
//!
//! ```text
//!  backend events ──▶ relay ───┐
//!                               ├──▶ mpsc(event_buffer) ──▶ Dispatcher ──▶ StackReconciler
//!  list_stacks ────▶ resync ───┘
//! ```
//!
//! Cancelling the manager's token stops both producers. Once they are gone
//! the channel closes and the dispatcher returns after the reconcile in
//! flight, if any.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError, Subscription};
use crate::config::{ConfigError, EngineConfig};
use crate::dispatcher::{Dispatcher, PendingSet};
use crate::reconciler::StackReconciler;
use crate::types::{Event, EventAction, ResourceKind};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to subscribe to events: {0}")]
    Subscribe(#[from] BackendError),
}

pub struct Manager {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl Manager {
    pub fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned stop signal.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops [`Manager::run`] when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the engine until cancelled, or until the event window closes.
    pub async fn run(&self) -> Result<(), ManagerError> {
        self.config.validate()?;

        let pending = Arc::new(PendingSet::new());
        let reconciler = Arc::new(StackReconciler::new(self.backend.clone(), pending.clone()));
        let dispatcher = Dispatcher::new(reconciler, pending)
            .with_retry_backoff(self.config.retry_backoff);

        // Subscribe before the initial resync so nothing changed in between
        // is missed.
        let subscription = self
            .backend
            .subscribe(
                self.config.since,
                self.config.until,
                self.config.filter.clone(),
            )
            .await?;

        let (tx, rx) = mpsc::channel(self.config.event_buffer);

        info!(
            event_buffer = self.config.event_buffer,
            resync_interval = ?self.config.resync_interval,
            backlog = subscription.backlog.len(),
            "stack reconciler started"
        );

        let relay = tokio::spawn(relay_events(
            self.backend.clone(),
            subscription,
            tx.clone(),
            self.cancel.clone(),
        ));
        let resync = tokio::spawn(resync_stacks(
            self.backend.clone(),
            tx,
            self.config.resync_interval,
            self.cancel.clone(),
        ));
        let dispatch = tokio::spawn(async move { dispatcher.handle_events(rx).await });

        for (name, task) in [("relay", relay), ("resync", resync)] {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "producer task failed");
            }
        }
        if let Err(e) = dispatch.await {
            error!(error = %e, "dispatcher task failed");
        }

        info!("stack reconciler stopped");
        Ok(())
    }
}

/// Send one event unless cancelled first. Returns `false` once forwarding
/// should stop.
async fn forward(tx: &mpsc::Sender<Event>, cancel: &CancellationToken, event: Event) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// Queue every known stack.
async fn resync_all(
    backend: &Arc<dyn Backend>,
    tx: &mpsc::Sender<Event>,
    cancel: &CancellationToken,
) -> bool {
    let stacks = match backend.list_stacks().await {
        Ok(stacks) => stacks,
        Err(e) => {
            warn!(error = %e, "failed to list stacks for resync");
            return true;
        }
    };

    debug!(stacks = stacks.len(), "resyncing stacks");
    for stack in stacks {
        let event = Event::new(ResourceKind::Stack, EventAction::Update, stack.id);
        if !forward(tx, cancel, event).await {
            return false;
        }
    }
    true
}

async fn relay_events(
    backend: Arc<dyn Backend>,
    subscription: Subscription,
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    let id = subscription.id;
    relay_subscription(&backend, subscription, &tx, &cancel).await;

    if let Err(e) = backend.unsubscribe(id).await {
        warn!(subscription = id, error = %e, "failed to unsubscribe");
    }
    debug!(subscription = id, "event relay stopped");
}

async fn relay_subscription(
    backend: &Arc<dyn Backend>,
    subscription: Subscription,
    tx: &mpsc::Sender<Event>,
    cancel: &CancellationToken,
) {
    let Subscription {
        backlog,
        live,
        filter,
        until,
        ..
    } = subscription;
    let past_window = |event: &Event| until.is_some_and(|until| event.time > until);

    for event in backlog {
        if past_window(&event) {
            return;
        }
        if !forward(tx, cancel, event).await {
            return;
        }
    }

    let mut live = BroadcastStream::new(live);
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            item = live.next() => item,
        };

        match item {
            Some(Ok(event)) => {
                if !filter.matches(&event) {
                    continue;
                }
                if past_window(&event) {
                    info!(until = ?until, "event window closed");
                    return;
                }
                if !forward(tx, cancel, event).await {
                    return;
                }
            }
            Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                warn!(missed, "event stream lagged, resyncing all stacks");
                if !resync_all(backend, tx, cancel).await {
                    return;
                }
            }
            None => {
                info!("event stream closed");
                return;
            }
        }
    }
}

async fn resync_stacks(
    backend: Arc<dyn Backend>,
    tx: mpsc::Sender<Event>,
    interval: Option<Duration>,
    cancel: CancellationToken,
) {
    if !resync_all(&backend, &tx, &cancel).await {
        return;
    }
    let Some(interval) = interval else {
        return;
    };

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; the initial pass already ran.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !resync_all(&backend, &tx, &cancel).await {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;
    use crate::backend::{ConfigBackend, EventBackend, MemoryBackend, StackBackend};
    use crate::types::{Annotations, ConfigSpec, EventFilter, StackSpec};

    #[tokio::test]
    async fn test_lagged_stream_resyncs_all_stacks() {
        let backend = Arc::new(MemoryBackend::with_event_capacity(2));
        let stack_id = backend.create_stack(StackSpec::named("app")).await.unwrap();
        let subscription = backend.subscribe(None, None, EventFilter::all()).await.unwrap();

        // Overflow the live channel before the relay reads from it.
        for i in 0..5 {
            backend
                .create_config(ConfigSpec {
                    annotations: Annotations::named(format!("config{i}")),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let relay = tokio::spawn(relay_events(backend.clone(), subscription, tx, cancel.clone()));

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ResourceKind::Stack);
        assert_eq!(event.resource_id(), stack_id);

        cancel.cancel();
        relay.await.unwrap();
        assert_eq!(backend.active_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_relay_stops_past_window() {
        let backend = Arc::new(MemoryBackend::new());
        let until = chrono::Utc::now();
        let subscription = backend
            .subscribe(None, Some(until), EventFilter::all())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (tx, mut rx) = mpsc::channel(16);
        let relay = tokio::spawn(relay_events(
            backend.clone(),
            subscription,
            tx,
            CancellationToken::new(),
        ));
        backend.create_stack(StackSpec::named("late")).await.unwrap();

        timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = Manager::new(backend, EngineConfig::default().with_event_buffer(0));
        assert!(matches!(manager.run().await, Err(ManagerError::Config(_))));
    }
}
