//! The discoverer service
//!
//! Wires watchers, live stores, the index builder and the query service into
//! one long-lived instance. Watchers write the stores, the reconciliation loop
//! turns the stores into published indices, and queries read the indices.

mod query;
mod r#loop;


pub use query::QueryService;
pub use r#loop::{ReconcileConfig, ReconcileLoop, ReconcileLoopBuilder, DEFAULT_DISCOVER_INTERVAL};

use crate::error::DiscoveryResult;
use crate::health::{components, HealthRegistry};
use crate::index::{IndexBuilder, Indices, DEFAULT_MAX_PODS};
use crate::models::{DiscoveryRequest, NodeView, PodView, ServiceView};
use crate::observability::{DiscovererMetrics, StructuredLogger};
use crate::state::ClusterState;
use crate::watch::{ResourceWatcher, WatchError};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

/// Settings for one discoverer instance
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Instance name used in structured logs
    pub instance: String,
    /// Reconciliation interval (default: 2 seconds)
    pub discover_interval: Duration,
    /// Pod capacity reserved on each node view
    pub max_pods: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            instance: "discoverer".to_string(),
            discover_interval: DEFAULT_DISCOVER_INTERVAL,
            max_pods: DEFAULT_MAX_PODS,
        }
    }
}

/// Cluster discovery service instance
pub struct Discoverer {
    options: DiscoveryOptions,
    state: Arc<ClusterState>,
    builder: Arc<IndexBuilder>,
    query: QueryService,
    watchers: Vec<Arc<dyn ResourceWatcher>>,
    health: HealthRegistry,
    metrics: DiscovererMetrics,
    logger: StructuredLogger,
}

impl Discoverer {
    pub fn new(options: DiscoveryOptions) -> Self {
        Self::with_health(options, HealthRegistry::new())
    }

    /// Create an instance reporting into an existing health registry
    pub fn with_health(options: DiscoveryOptions, health: HealthRegistry) -> Self {
        let state = Arc::new(ClusterState::new());
        let indices = Arc::new(Indices::new());
        let builder = Arc::new(
            IndexBuilder::new(state.clone(), indices.clone()).with_max_pods(options.max_pods),
        );

        Self {
            logger: StructuredLogger::new(options.instance.clone()),
            options,
            state,
            builder,
            query: QueryService::new(indices),
            watchers: Vec::new(),
            health,
            metrics: DiscovererMetrics::new(),
        }
    }

    /// Live stores the watchers write into
    pub fn state(&self) -> Arc<ClusterState> {
        self.state.clone()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn metrics(&self) -> &DiscovererMetrics {
        &self.metrics
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    /// Register a watcher; it is started by `start`
    pub fn add_watcher(&mut self, watcher: Arc<dyn ResourceWatcher>) {
        self.watchers.push(watcher);
    }

    pub fn add_watchers(&mut self, watchers: impl IntoIterator<Item = Arc<dyn ResourceWatcher>>) {
        self.watchers.extend(watchers);
    }

    /// Start every watcher and the reconciliation loop.
    ///
    /// Returns the merged watcher error channel. It closes once `shutdown`
    /// fires and the loop exits.
    pub async fn start(
        &self,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<mpsc::Receiver<WatchError>> {
        self.health.register(components::INDEX_BUILDER).await;
        let (mut reconcile_loop, errors) = self.reconcile_loop()?;

        for watcher in &self.watchers {
            let name = watcher.name().to_string();
            let watcher_errors = watcher
                .clone()
                .start(shutdown.subscribe())
                .await
                .with_context(|| format!("failed to start {} watcher", name))?;
            reconcile_loop.add_watcher_errors(name, watcher_errors);
        }

        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.options.discover_interval.as_millis() as u64,
        );
        info!(watchers = self.watchers.len(), "Discoverer running");

        tokio::spawn(reconcile_loop.run(shutdown.subscribe()));
        Ok(errors)
    }

    /// Run one build-and-publish cycle outside the loop.
    ///
    /// Health, readiness and build metrics are updated as for a loop tick.
    pub async fn reconcile_now(&self) -> Result<()> {
        let (reconcile_loop, _errors) = self.reconcile_loop()?;
        reconcile_loop.reconcile().await.map(|_| ())
    }

    fn reconcile_loop(&self) -> Result<(ReconcileLoop, mpsc::Receiver<WatchError>)> {
        ReconcileLoopBuilder::new()
            .index_builder(self.builder.clone())
            .interval(self.options.discover_interval)
            .health(self.health.clone())
            .metrics(self.metrics.clone())
            .logger(self.logger.clone())
            .build()
    }

    pub fn get_pods(&self, req: &DiscoveryRequest) -> DiscoveryResult<Vec<PodView>> {
        self.timed("pods", || self.query.get_pods(req))
    }

    pub fn get_nodes(&self, req: &DiscoveryRequest) -> DiscoveryResult<Vec<NodeView>> {
        self.timed("nodes", || self.query.get_nodes(req))
    }

    pub fn get_services(&self, req: &DiscoveryRequest) -> DiscoveryResult<Vec<ServiceView>> {
        self.timed("services", || self.query.get_services(req))
    }

    pub fn log_shutdown(&self, reason: &str) {
        self.logger.log_shutdown(reason);
    }

    fn timed<T>(&self, query: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.metrics
            .observe_query_latency(query, start.elapsed().as_secs_f64());
        result
    }
}
