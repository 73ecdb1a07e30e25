//! Reconciliation loop
//!
//! Rebuilds and publishes the indices on every tick and multiplexes the
//! watchers' error channels into one outward channel. Builds run inside the
//! loop's own task; shutdown is only observed between builds.

use crate::health::{components, HealthRegistry};
use crate::index::{BuildSummary, IndexBuilder};
use crate::observability::{DiscovererMetrics, StructuredLogger};
use crate::watch::WatchError;
use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};

/// Default reconciliation interval
pub const DEFAULT_DISCOVER_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Time between index rebuilds (default: 2 seconds)
    pub interval: Duration,
    /// Capacity of the outward error channel
    pub error_buffer: usize,
    /// Consecutive failed builds before the builder is reported unhealthy
    pub unhealthy_after: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_DISCOVER_INTERVAL,
            error_buffer: 100,
            unhealthy_after: 3,
        }
    }
}

/// Ticker-driven index rebuild loop
pub struct ReconcileLoop {
    builder: Arc<IndexBuilder>,
    config: ReconcileConfig,
    /// watcher name -> error channel
    watch_errors: StreamMap<String, ReceiverStream<WatchError>>,
    errors_tx: mpsc::Sender<WatchError>,
    consecutive_failures: AtomicU32,
    health: Option<HealthRegistry>,
    metrics: Option<DiscovererMetrics>,
    logger: Option<StructuredLogger>,
}

impl ReconcileLoop {
    /// Create a loop and the receiving end of its outward error channel
    pub fn new(
        builder: Arc<IndexBuilder>,
        config: ReconcileConfig,
    ) -> (Self, mpsc::Receiver<WatchError>) {
        let (errors_tx, errors_rx) = mpsc::channel(config.error_buffer.max(1));

        let loop_instance = Self {
            builder,
            config,
            watch_errors: StreamMap::new(),
            errors_tx,
            consecutive_failures: AtomicU32::new(0),
            health: None,
            metrics: None,
            logger: None,
        };

        (loop_instance, errors_rx)
    }

    /// Multiplex a watcher's error channel into the outward channel
    pub fn add_watcher_errors(&mut self, watcher: impl Into<String>, errors: mpsc::Receiver<WatchError>) {
        self.watch_errors
            .insert(watcher.into(), ReceiverStream::new(errors));
    }

    /// Run until `shutdown` fires, then close the outward error channel
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            watchers = self.watch_errors.len(),
            "Starting reconciliation loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged and counted inside; the next tick retries
                    let _ = self.reconcile().await;
                }
                Some((watcher, err)) = self.watch_errors.next(), if !self.watch_errors.is_empty() => {
                    self.forward(&watcher, err);
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation loop");
                    break;
                }
            }
        }
    }

    /// Run one build-and-publish cycle
    pub async fn reconcile(&self) -> Result<BuildSummary> {
        let start = Instant::now();

        match self.builder.build_and_publish().await {
            Ok(summary) => {
                let elapsed = start.elapsed();
                let generation = self.builder.indices().node_by_name.generation();
                self.consecutive_failures.store(0, Ordering::Relaxed);

                if let Some(metrics) = &self.metrics {
                    metrics.record_build(elapsed.as_secs_f64(), &summary);
                }
                if let Some(health) = &self.health {
                    health.set_healthy(components::INDEX_BUILDER).await;
                    health.mark_published(generation).await;
                }

                if generation == 1 {
                    if let Some(logger) = &self.logger {
                        logger.log_index_published(generation, &summary, elapsed.as_millis() as u64);
                    }
                }
                debug!(
                    generation,
                    nodes = summary.nodes,
                    pods = summary.pods,
                    services = summary.services,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Reconciliation cycle complete"
                );

                Ok(summary)
            }
            Err(e) => {
                self.record_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Degrade the builder, or mark it unhealthy once failures repeat
    async fn record_failure(&self, error: &anyhow::Error) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            error = %error,
            consecutive_failures = failures,
            "Index build failed, keeping previous snapshots"
        );

        if let Some(metrics) = &self.metrics {
            metrics.inc_build_failures();
        }
        if let Some(health) = &self.health {
            let message = format!("{:#}", error);
            if failures >= self.config.unhealthy_after {
                health.set_unhealthy(components::INDEX_BUILDER, message).await;
            } else {
                health.set_degraded(components::INDEX_BUILDER, message).await;
            }
        }
    }

    fn forward(&self, watcher: &str, err: WatchError) {
        match &self.logger {
            Some(logger) => logger.log_watcher_error(watcher, &format!("{:#}", err.error)),
            None => warn!(watcher = %watcher, error = %err, "Watcher error"),
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_watcher_errors(watcher);
        }
        if let Err(e) = self.errors_tx.try_send(err) {
            debug!(watcher = %watcher, error = %e, "Outward error channel unavailable, dropping error");
        }
    }
}

/// Builder for creating the reconciliation loop
pub struct ReconcileLoopBuilder {
    builder: Option<Arc<IndexBuilder>>,
    config: ReconcileConfig,
    health: Option<HealthRegistry>,
    metrics: Option<DiscovererMetrics>,
    logger: Option<StructuredLogger>,
}

impl ReconcileLoopBuilder {
    pub fn new() -> Self {
        Self {
            builder: None,
            config: ReconcileConfig::default(),
            health: None,
            metrics: None,
            logger: None,
        }
    }

    /// Set the index builder
    pub fn index_builder(mut self, builder: Arc<IndexBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Set the reconciliation interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn error_buffer(mut self, size: usize) -> Self {
        self.config.error_buffer = size;
        self
    }

    /// Consecutive failed builds before the builder is reported unhealthy
    pub fn unhealthy_after(mut self, failures: u32) -> Self {
        self.config.unhealthy_after = failures.max(1);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: DiscovererMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the loop
    pub fn build(self) -> Result<(ReconcileLoop, mpsc::Receiver<WatchError>)> {
        let builder = self
            .builder
            .ok_or_else(|| anyhow::anyhow!("Index builder is required"))?;

        let (mut reconcile_loop, errors_rx) = ReconcileLoop::new(builder, self.config);
        reconcile_loop.health = self.health;
        reconcile_loop.metrics = self.metrics;
        reconcile_loop.logger = self.logger;

        Ok((reconcile_loop, errors_rx))
    }
}

impl Default for ReconcileLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
