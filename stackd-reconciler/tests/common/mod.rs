//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stackd_reconciler::types::{
    Annotations, ConfigSpec, NetworkCreate, SecretSpec, ServiceSpec, StackSpec, TaskSpec,
};
use stackd_reconciler::{EngineConfig, Manager, ManagerError, MemoryBackend};

/// A stack with one resource of every kind.
pub fn sample_stack(name: &str) -> StackSpec {
    let mut spec = StackSpec::named(name);
    spec.services.push(ServiceSpec {
        annotations: Annotations::named("web"),
        task_template: TaskSpec {
            image: "nginx:1.27".to_string(),
            secrets: vec!["db-password".to_string()],
            configs: vec!["nginx.conf".to_string()],
            networks: vec!["frontend".to_string()],
            ..Default::default()
        },
        ..Default::default()
    });
    spec.secrets.push(SecretSpec {
        annotations: Annotations::named("db-password"),
        data: b"hunter2".to_vec(),
        driver: None,
    });
    spec.configs.push(config("nginx.conf", b"server { listen 80; }"));
    spec.networks
        .insert("frontend".to_string(), NetworkCreate::default());
    spec
}

pub fn config(name: &str, data: &[u8]) -> ConfigSpec {
    ConfigSpec {
        annotations: Annotations::named(name),
        data: data.to_vec(),
        templating: None,
    }
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A running engine over an in-memory substrate.
pub struct TestEngine {
    pub backend: Arc<MemoryBackend>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ManagerError>>,
}

impl TestEngine {
    pub async fn spawn(backend: Arc<MemoryBackend>) -> Self {
        let config = EngineConfig::default().with_retry_backoff(Duration::from_millis(5));
        Self::spawn_with(backend, config).await
    }

    pub async fn spawn_with(backend: Arc<MemoryBackend>, config: EngineConfig) -> Self {
        let manager = Manager::new(backend.clone(), config);
        let cancel = manager.cancellation_token();
        let task = tokio::spawn(async move { manager.run().await });
        Self {
            backend,
            cancel,
            task,
        }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("engine did not stop")
            .expect("engine panicked")
            .expect("engine failed");
    }
}
