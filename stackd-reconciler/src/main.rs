//! stackd-reconciler: converges stack deployments with the substrate.
//!
//! Runs the engine against the in-memory substrate, optionally seeded with
//! stack files, until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stackd_reconciler::backend::StackBackend;
use stackd_reconciler::types::EventFilter;
use stackd_reconciler::{EngineConfig, Manager, MemoryBackend, ResourceKind, load_stack_spec};

/// stackd stack reconciler
#[derive(Parser, Debug)]
#[command(name = "stackd-reconciler", version, about)]
struct Args {
    /// Capacity of the event channel feeding the dispatcher
    #[arg(long, default_value = "256")]
    event_buffer: usize,

    /// Re-enqueue every stack this often, in seconds (0 disables)
    #[arg(long, default_value = "0")]
    resync_interval: u64,

    /// Pause before retrying a failed reconcile, in milliseconds
    #[arg(long, default_value = "250")]
    retry_backoff_ms: u64,

    /// Replay events logged since this time (RFC 3339)
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Stop after events past this time (RFC 3339)
    #[arg(long)]
    until: Option<DateTime<Utc>>,

    /// Only react to events of this kind (can be repeated; default: all)
    #[arg(long = "kind")]
    kinds: Vec<ResourceKind>,

    /// Stack spec file (JSON) to deploy at startup (can be repeated)
    #[arg(long = "stack")]
    stacks: Vec<PathBuf>,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let filter = if self.kinds.is_empty() {
            EventFilter::all()
        } else {
            EventFilter::kinds(self.kinds.iter().copied())
        };

        let mut config = EngineConfig::default()
            .with_event_buffer(self.event_buffer)
            .with_retry_backoff(Duration::from_millis(self.retry_backoff_ms))
            .with_window(self.since, self.until)
            .with_filter(filter);
        if self.resync_interval > 0 {
            config = config.with_resync_interval(Duration::from_secs(self.resync_interval));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stackd_reconciler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.engine_config();

    let backend = Arc::new(MemoryBackend::new());
    for path in &args.stacks {
        let spec = load_stack_spec(path)?;
        let name = spec.annotations.name.clone();
        let id = backend
            .create_stack(spec)
            .await
            .with_context(|| format!("failed to create stack from {}", path.display()))?;
        info!(stack = %name, stack_id = %id, "stack created");
    }

    let cancel = CancellationToken::new();
    let manager = Manager::new(backend, config).with_cancellation(cancel.clone());
    let mut engine = tokio::spawn(async move { manager.run().await });

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    // The engine ends on its own once an --until window closes.
    let finished = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            None
        }
        result = &mut engine => Some(result),
    };
    let result = match finished {
        Some(result) => result,
        None => {
            cancel.cancel();
            engine.await
        }
    };

    result
        .context("engine task panicked")?
        .context("engine failed")?;

    info!("Shutdown complete");
    Ok(())
}
