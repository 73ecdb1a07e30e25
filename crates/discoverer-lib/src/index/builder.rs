//! Index rebuild pipeline
//!
//! Joins the five live stores into fresh index maps:
//! 1. nodes merged with their usage samples
//! 2. one pass over the pods, merging pod samples and the owning node, and
//!    inserting each pod into the by-node, by-namespace and by-name maps
//! 3. services with their ports reduced to the API ports
//! 4. three concurrent sort passes, one per pod index family; the by-node
//!    pass also attaches every pod to its node
//!
//! Missing cross references never fail a build. A pod on an unknown node
//! keeps `node: None` and the next tick picks the node up.

use super::{
    sort_by_memory_usage, Indices, NodeByName, PodsByName, PodsByNamespace, PodsByNode,
    ServiceByName,
};
use crate::models::{pod_key, NodeView, PodView, ServiceView};
use crate::state::ClusterState;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task;
use tracing::debug;

/// Default upper bound on the pod capacity reserved per node view
pub const DEFAULT_MAX_PODS: usize = 1500;

/// Freshly built, not yet published index maps
#[derive(Debug, Default)]
pub struct BuiltIndices {
    pub node_by_name: NodeByName,
    pub pods_by_node: PodsByNode,
    pub pods_by_namespace: PodsByNamespace,
    pub pods_by_name: PodsByName,
    pub service_by_name: ServiceByName,
}

/// Counts from one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub nodes: usize,
    pub pods: usize,
    pub services: usize,
    /// Pods whose node is not in the node store
    pub orphan_pods: usize,
}

/// Builds index maps from the live state and publishes them
pub struct IndexBuilder {
    state: Arc<ClusterState>,
    indices: Arc<Indices>,
    max_pods: usize,
}

impl IndexBuilder {
    pub fn new(state: Arc<ClusterState>, indices: Arc<Indices>) -> Self {
        Self {
            state,
            indices,
            max_pods: DEFAULT_MAX_PODS,
        }
    }

    /// Cap the pod capacity reserved up front on each node view
    pub fn with_max_pods(mut self, max_pods: usize) -> Self {
        self.max_pods = max_pods;
        self
    }

    pub fn indices(&self) -> &Arc<Indices> {
        &self.indices
    }

    /// Build and publish every index family.
    ///
    /// All three sort passes finish before the first publish.
    pub async fn build_and_publish(&self) -> Result<BuildSummary> {
        let (built, summary) = self.build().await?;
        self.indices.publish(built);
        Ok(summary)
    }

    /// Build fresh index maps without publishing them.
    ///
    /// Fails only when a sort pass task panics.
    pub async fn build(&self) -> Result<(BuiltIndices, BuildSummary)> {
        let mut summary = BuildSummary::default();

        let (mut node_by_name, node_refs) = self.build_nodes();
        summary.nodes = node_by_name.len();

        let mut pods_by_node = PodsByNode::new();
        let mut pods_by_namespace = PodsByNamespace::new();
        let mut pods_by_name = PodsByName::new();

        self.state.pods.range(|app_name, pods| {
            for pod in pods {
                let metrics = self
                    .state
                    .pod_metrics
                    .load(&pod_key(&pod.namespace, &pod.name));
                let node = node_refs.get(&pod.node_name).cloned();
                if node.is_none() {
                    summary.orphan_pods += 1;
                }

                let view = PodView::merge(pod, metrics.as_ref(), node);

                pods_by_node
                    .entry(pod.node_name.clone())
                    .or_default()
                    .entry(pod.namespace.clone())
                    .or_default()
                    .entry(app_name.to_string())
                    .or_default()
                    .push(view.clone());
                pods_by_namespace
                    .entry(pod.namespace.clone())
                    .or_default()
                    .entry(app_name.to_string())
                    .or_default()
                    .push(view.clone());
                pods_by_name
                    .entry(app_name.to_string())
                    .or_default()
                    .push(view);

                summary.pods += 1;
            }
        });

        let service_by_name = self.build_services();
        summary.services = service_by_name.len();

        let max_pods = self.max_pods;
        let (by_node, by_namespace, by_name) = tokio::join!(
            task::spawn_blocking(move || {
                attach_node_pods(&mut pods_by_node, &mut node_by_name, max_pods);
                (pods_by_node, node_by_name)
            }),
            task::spawn_blocking(move || {
                for apps in pods_by_namespace.values_mut() {
                    sort_leaves(apps);
                }
                pods_by_namespace
            }),
            task::spawn_blocking(move || {
                sort_leaves(&mut pods_by_name);
                pods_by_name
            }),
        );

        let (pods_by_node, node_by_name) = by_node.context("pods-by-node sort pass failed")?;
        let pods_by_namespace = by_namespace.context("pods-by-namespace sort pass failed")?;
        let pods_by_name = by_name.context("pods-by-name sort pass failed")?;

        debug!(
            nodes = summary.nodes,
            pods = summary.pods,
            services = summary.services,
            orphan_pods = summary.orphan_pods,
            "Built indices"
        );

        Ok((
            BuiltIndices {
                node_by_name,
                pods_by_node,
                pods_by_namespace,
                pods_by_name,
                service_by_name,
            },
            summary,
        ))
    }

    /// Node views keyed by name, plus a pod-less shared copy of each for
    /// pods to point at
    fn build_nodes(&self) -> (NodeByName, HashMap<String, Arc<NodeView>>) {
        let capacity = self.state.nodes.len();
        let mut node_by_name = NodeByName::with_capacity(capacity);
        let mut node_refs = HashMap::with_capacity(capacity);

        self.state.nodes.range(|name, node| {
            let metrics = self.state.node_metrics.load(name);
            let view = NodeView::merge(node, metrics.as_ref());
            node_refs.insert(
                name.to_string(),
                Arc::new(NodeView {
                    pods: Vec::new(),
                    ..view.clone()
                }),
            );
            node_by_name.insert(name.to_string(), view);
        });

        (node_by_name, node_refs)
    }

    fn build_services(&self) -> ServiceByName {
        let mut service_by_name = ServiceByName::with_capacity(self.state.services.len());
        self.state.services.range(|name, svc| {
            service_by_name.insert(name.to_string(), ServiceView::from_record(svc));
        });
        service_by_name
    }
}

fn sort_leaves(apps: &mut PodsByName) {
    for pods in apps.values_mut() {
        sort_by_memory_usage(pods);
    }
}

/// Sort every leaf slice and copy it into the owning node's pod list
///
/// Each node list is reserved for its own pod count, at most `max_pods` up
/// front, so nodes without pods publish an unallocated list.
fn attach_node_pods(pods_by_node: &mut PodsByNode, node_by_name: &mut NodeByName, max_pods: usize) {
    for (node_name, namespaces) in pods_by_node.iter_mut() {
        let mut node = node_by_name.get_mut(node_name);
        if let Some(node) = node.as_mut() {
            let count: usize = namespaces
                .values()
                .flat_map(|apps| apps.values())
                .map(Vec::len)
                .sum();
            node.pods.reserve_exact(count.min(max_pods));
        }
        for apps in namespaces.values_mut() {
            for pods in apps.values_mut() {
                sort_by_memory_usage(pods);
                if let Some(node) = node.as_mut() {
                    node.pods.extend(pods.iter().cloned());
                }
            }
        }
        if let Some(node) = node {
            sort_by_memory_usage(&mut node.pods);
            node.pods.shrink_to_fit();
        }
    }
}
