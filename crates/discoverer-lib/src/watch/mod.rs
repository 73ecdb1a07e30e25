//! Resource watchers
//!
//! A watcher observes one resource kind and hands the complete current state
//! of that kind to its on-reconcile callback, never a delta. Failures go to
//! the on-error callback and out on the error channel returned by `start`;
//! the watcher itself retries on its next cycle. The discoverer core only
//! depends on the `ResourceWatcher` trait, so the watch mechanism can be
//! swapped without touching the stores or indices.

pub mod k8s;
mod quantity;

pub use quantity::parse_quantity;

use crate::health::HealthRegistry;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default polling interval for each watcher
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Default capacity of each watcher's error channel
pub const DEFAULT_ERROR_BUFFER: usize = 64;

/// A failure reported by a watcher
#[derive(Debug)]
pub struct WatchError {
    pub watcher: String,
    pub error: anyhow::Error,
}

impl WatchError {
    pub fn new(watcher: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            watcher: watcher.into(),
            error,
        }
    }
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher {} failed: {:#}", self.watcher, self.error)
    }
}

/// Receives the full current state of one resource kind
pub type ReconcileCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Receives watcher failures, typically for logging
pub type ErrorCallback = Arc<dyn Fn(&WatchError) + Send + Sync>;

/// Something that can run in the background and report errors
#[async_trait]
pub trait ResourceWatcher: Send + Sync {
    /// Name used in logs, health and error reports
    fn name(&self) -> &str;

    /// Start watching until `shutdown` fires.
    ///
    /// The returned channel carries every failure; it closes when the
    /// watcher stops.
    async fn start(
        self: Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<mpsc::Receiver<WatchError>>;
}

/// Lists the complete current state of one resource kind
#[async_trait]
pub trait ResourceSource: Send + Sync + 'static {
    type State: Send + 'static;

    fn kind(&self) -> &'static str;

    async fn list(&self) -> Result<Self::State>;
}

/// Watcher that lists its source on a fixed interval
pub struct PollingWatcher<S: ResourceSource> {
    name: String,
    source: S,
    interval: Duration,
    error_buffer: usize,
    on_reconcile: Option<ReconcileCallback<S::State>>,
    on_error: Option<ErrorCallback>,
    health: Option<HealthRegistry>,
}

impl<S: ResourceSource> PollingWatcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            name: source.kind().to_string(),
            source,
            interval: DEFAULT_WATCH_INTERVAL,
            error_buffer: DEFAULT_ERROR_BUFFER,
            on_reconcile: None,
            on_error: None,
            health: None,
        }
    }

    /// Override the watcher name (defaults to the source kind)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn error_buffer(mut self, size: usize) -> Self {
        self.error_buffer = size.max(1);
        self
    }

    /// Register the full-state callback
    pub fn on_reconcile<F>(mut self, f: F) -> Self
    where
        F: Fn(S::State) + Send + Sync + 'static,
    {
        self.on_reconcile = Some(Arc::new(f));
        self
    }

    /// Register the error callback
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Report this watcher's health under its name
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// List the source once and deliver the result
    pub async fn reconcile_once(&self) -> std::result::Result<(), WatchError> {
        match self.source.list().await {
            Ok(state) => {
                match &self.on_reconcile {
                    Some(callback) => callback(state),
                    None => debug!(watcher = %self.name, "No reconcile callback registered"),
                }
                if let Some(health) = &self.health {
                    health.set_healthy(&self.name).await;
                }
                Ok(())
            }
            Err(error) => {
                let err = WatchError::new(self.name.clone(), error);
                if let Some(callback) = &self.on_error {
                    callback(&err);
                }
                if let Some(health) = &self.health {
                    health.set_degraded(&self.name, format!("{:#}", err.error)).await;
                }
                Err(err)
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
        errors: mpsc::Sender<WatchError>,
    ) {
        info!(
            watcher = %self.name,
            interval_ms = self.interval.as_millis() as u64,
            "Starting watcher"
        );

        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.reconcile_once().await {
                        if let Err(e) = errors.try_send(err) {
                            debug!(watcher = %self.name, error = %e, "Dropped watcher error");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(watcher = %self.name, "Shutting down watcher");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl<S: ResourceSource> ResourceWatcher for PollingWatcher<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        self: Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<mpsc::Receiver<WatchError>> {
        if self.on_reconcile.is_none() {
            warn!(watcher = %self.name, "Starting watcher without a reconcile callback");
        }
        if let Some(health) = &self.health {
            health.register(&self.name).await;
        }

        let (tx, rx) = mpsc::channel(self.error_buffer);
        tokio::spawn(self.run(shutdown, tx));
        Ok(rx)
    }
}
