//! Engine configuration and stack file loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::dispatcher::DEFAULT_RETRY_BACKOFF;
use crate::types::{EventFilter, StackSpec};

/// Default capacity of the event channel feeding the dispatcher.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings for the [`Manager`](crate::manager::Manager).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the bounded event channel.
    pub event_buffer: usize,
    /// Re-enqueue every stack this often. `None` disables periodic resync.
    pub resync_interval: Option<Duration>,
    /// Pause before retrying a failed reconcile.
    pub retry_backoff: Duration,
    /// Replay logged events from this point on.
    pub since: Option<DateTime<Utc>>,
    /// Stop relaying events after this point.
    pub until: Option<DateTime<Utc>>,
    pub filter: EventFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            resync_interval: None,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            since: None,
            until: None,
            filter: EventFilter::all(),
        }
    }
}

impl EngineConfig {
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_window(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event buffer must be at least 1".to_string()));
        }
        if self.resync_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::Invalid("resync interval must be non-zero".to_string()));
        }
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(ConfigError::Invalid(format!(
                    "event window is empty: since {since} is after until {until}"
                )));
            }
        }
        Ok(())
    }
}

/// Read a stack spec from a JSON file.
pub fn load_stack_spec(path: impl AsRef<Path>) -> Result<StackSpec, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
