//! Live cluster state fed by watcher callbacks
//!
//! Each resource kind has its own store with a single writer (the watcher
//! callback for that kind) and many readers (the index builder). Every
//! callback delivers the complete current state of its kind, which is
//! applied as a store-then-delete diff.

mod store;

pub use store::LiveStore;

use crate::models::{NodeMetrics, NodeRecord, PodMetrics, PodRecord, ServiceRecord};
use std::collections::HashMap;

/// Store names, also used as log field values
pub mod kinds {
    pub const NODE: &str = "node";
    pub const POD: &str = "pod";
    pub const SERVICE: &str = "service";
    pub const NODE_METRICS: &str = "node_metrics";
    pub const POD_METRICS: &str = "pod_metrics";
}

/// Latest watcher-reported state for every resource kind
#[derive(Debug)]
pub struct ClusterState {
    /// node name -> node
    pub nodes: LiveStore<NodeRecord>,
    /// node name -> usage sample
    pub node_metrics: LiveStore<NodeMetrics>,
    /// app name -> every pod of that app
    pub pods: LiveStore<Vec<PodRecord>>,
    /// `namespace/name` (see [`pod_key`](crate::models::pod_key)) -> usage sample
    pub pod_metrics: LiveStore<PodMetrics>,
    /// service name -> service
    pub services: LiveStore<ServiceRecord>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterState {
    pub fn new() -> Self {
        Self {
            nodes: LiveStore::new(kinds::NODE),
            node_metrics: LiveStore::new(kinds::NODE_METRICS),
            pods: LiveStore::new(kinds::POD),
            pod_metrics: LiveStore::new(kinds::POD_METRICS),
            services: LiveStore::new(kinds::SERVICE),
        }
    }

    pub fn reconcile_nodes(&self, nodes: HashMap<String, NodeRecord>) {
        self.nodes.reconcile(nodes);
    }

    pub fn reconcile_node_metrics(&self, metrics: HashMap<String, NodeMetrics>) {
        self.node_metrics.reconcile(metrics);
    }

    /// Replace the pod lists of every app
    pub fn reconcile_pods(&self, pods: HashMap<String, Vec<PodRecord>>) {
        self.pods.reconcile(pods);
    }

    /// Replace the pod usage samples, keyed by `namespace/name`
    pub fn reconcile_pod_metrics(&self, metrics: HashMap<String, PodMetrics>) {
        self.pod_metrics.reconcile(metrics);
    }

    pub fn reconcile_services(&self, services: HashMap<String, ServiceRecord>) {
        self.services.reconcile(services);
    }
}

/// Group pod records by app name
pub fn group_pods_by_app(pods: impl IntoIterator<Item = PodRecord>) -> HashMap<String, Vec<PodRecord>> {
    let mut grouped: HashMap<String, Vec<PodRecord>> = HashMap::new();
    for pod in pods {
        grouped.entry(pod.app_name.clone()).or_default().push(pod);
    }
    grouped
}
