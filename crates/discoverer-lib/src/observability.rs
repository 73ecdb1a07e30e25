//! Observability infrastructure for the discoverer
//!
//! Provides:
//! - Prometheus metrics (build latency, indexed object counts, watcher errors, query latency)
//! - Structured JSON logging with tracing

use crate::index::BuildSummary;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for build and query latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DiscovererMetricsInner> = OnceLock::new();

struct DiscovererMetricsInner {
    build_latency_seconds: Histogram,
    builds_total: IntCounter,
    build_failures_total: IntCounter,
    nodes_indexed: IntGauge,
    pods_indexed: IntGauge,
    services_indexed: IntGauge,
    orphan_pods: IntGauge,
    watcher_errors_total: IntCounterVec,
    query_latency_seconds: HistogramVec,
}

impl DiscovererMetricsInner {
    fn new() -> Self {
        Self {
            build_latency_seconds: register_histogram!(
                "discoverer_build_latency_seconds",
                "Time spent rebuilding and publishing the indices",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register build_latency_seconds"),

            builds_total: register_int_counter!(
                "discoverer_builds_total",
                "Total number of index builds published"
            )
            .expect("Failed to register builds_total"),

            build_failures_total: register_int_counter!(
                "discoverer_build_failures_total",
                "Total number of index builds that failed before publishing"
            )
            .expect("Failed to register build_failures_total"),

            nodes_indexed: register_int_gauge!(
                "discoverer_nodes_indexed",
                "Number of nodes in the last published index"
            )
            .expect("Failed to register nodes_indexed"),

            pods_indexed: register_int_gauge!(
                "discoverer_pods_indexed",
                "Number of pods in the last published index"
            )
            .expect("Failed to register pods_indexed"),

            services_indexed: register_int_gauge!(
                "discoverer_services_indexed",
                "Number of services in the last published index"
            )
            .expect("Failed to register services_indexed"),

            orphan_pods: register_int_gauge!(
                "discoverer_orphan_pods",
                "Pods in the last published index whose node was unknown"
            )
            .expect("Failed to register orphan_pods"),

            watcher_errors_total: register_int_counter_vec!(
                "discoverer_watcher_errors_total",
                "Total number of errors reported by watchers",
                &["watcher"]
            )
            .expect("Failed to register watcher_errors_total"),

            query_latency_seconds: register_histogram_vec!(
                "discoverer_query_latency_seconds",
                "Time spent answering discovery queries",
                &["query"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register query_latency_seconds"),
        }
    }
}

/// Discoverer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct DiscovererMetrics {
    _private: (),
}

impl Default for DiscovererMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscovererMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DiscovererMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DiscovererMetricsInner {
        GLOBAL_METRICS.get_or_init(DiscovererMetricsInner::new)
    }

    /// Record a successful build and the sizes it published
    pub fn record_build(&self, duration_secs: f64, summary: &BuildSummary) {
        let inner = self.inner();
        inner.build_latency_seconds.observe(duration_secs);
        inner.builds_total.inc();
        inner.nodes_indexed.set(summary.nodes as i64);
        inner.pods_indexed.set(summary.pods as i64);
        inner.services_indexed.set(summary.services as i64);
        inner.orphan_pods.set(summary.orphan_pods as i64);
    }

    pub fn inc_build_failures(&self) {
        self.inner().build_failures_total.inc();
    }

    pub fn inc_watcher_errors(&self, watcher: &str) {
        self.inner()
            .watcher_errors_total
            .with_label_values(&[watcher])
            .inc();
    }

    /// Record one query (`pods`, `nodes` or `services`)
    pub fn observe_query_latency(&self, query: &str, duration_secs: f64) {
        self.inner()
            .query_latency_seconds
            .with_label_values(&[query])
            .observe(duration_secs);
    }

    pub fn builds_total(&self) -> u64 {
        self.inner().builds_total.get()
    }
}

/// Structured logger for discoverer lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, discover_interval_ms: u64) {
        info!(
            event = "discoverer_started",
            instance = %self.instance,
            version = %version,
            discover_interval_ms = discover_interval_ms,
            "Discoverer started"
        );
    }

    pub fn log_index_published(&self, generation: u64, summary: &BuildSummary, elapsed_ms: u64) {
        info!(
            event = "index_published",
            instance = %self.instance,
            generation = generation,
            nodes = summary.nodes,
            pods = summary.pods,
            services = summary.services,
            orphan_pods = summary.orphan_pods,
            elapsed_ms = elapsed_ms,
            "Published discovery indices"
        );
    }

    pub fn log_watcher_error(&self, watcher: &str, error: &str) {
        warn!(
            event = "watcher_error",
            instance = %self.instance,
            watcher = %watcher,
            error = %error,
            "Watcher reported an error, serving last known state"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "discoverer_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Discoverer shutting down"
        );
    }
}
