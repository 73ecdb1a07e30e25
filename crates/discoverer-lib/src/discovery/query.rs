//! Read path over the published indices
//!
//! Queries never lock: each one loads the snapshot handles it needs once and
//! answers from that fixed set of immutable maps.

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::index::{sort_by_memory_usage, Indices, PodsByName, Snapshot};
use crate::models::{is_filter_set, DiscoveryRequest, NodeView, PodView, ServiceView};
use std::iter;
use std::sync::Arc;

/// Answers pod, node and service lookups
#[derive(Debug, Clone)]
pub struct QueryService {
    indices: Arc<Indices>,
}

impl QueryService {
    pub fn new(indices: Arc<Indices>) -> Self {
        Self { indices }
    }

    /// Pods matching the request, ascending by memory usage.
    ///
    /// `node` picks the by-node index (narrowed further by `namespace` when
    /// both are set), otherwise `namespace` picks the by-namespace index,
    /// otherwise the global by-name index is used. `name` then selects one
    /// app; without it every app is returned.
    pub fn get_pods(&self, req: &DiscoveryRequest) -> DiscoveryResult<Vec<PodView>> {
        let mut pods = if is_filter_set(&req.node) {
            let by_node = load(&self.indices.pods_by_node)?;
            let namespaces = by_node
                .get(&req.node)
                .ok_or_else(|| DiscoveryError::NodeNotFound(req.node.clone()))?;

            if is_filter_set(&req.namespace) {
                let apps = namespaces
                    .get(&req.namespace)
                    .ok_or_else(|| DiscoveryError::NamespaceNotFound(req.namespace.clone()))?;
                select_apps(iter::once(apps), &req.name)?
            } else {
                select_apps(namespaces.values(), &req.name)?
            }
        } else if is_filter_set(&req.namespace) {
            let by_namespace = load(&self.indices.pods_by_namespace)?;
            let apps = by_namespace
                .get(&req.namespace)
                .ok_or_else(|| DiscoveryError::NamespaceNotFound(req.namespace.clone()))?;
            select_apps(iter::once(apps), &req.name)?
        } else {
            let by_name = load(&self.indices.pods_by_name)?;
            select_apps(iter::once(&*by_name), &req.name)?
        };

        for pod in pods.iter_mut() {
            pod.detach_node_pods();
        }
        sort_by_memory_usage(&mut pods);
        Ok(pods)
    }

    /// Nodes matching the request, each with its pods attached.
    ///
    /// A single node comes back with the pods `get_pods` would find for the
    /// same request, taken from the node snapshot already loaded; a node
    /// without any indexed pods comes back with none. The unfiltered list is
    /// sorted by node memory usage.
    pub fn get_nodes(&self, req: &DiscoveryRequest) -> DiscoveryResult<Vec<NodeView>> {
        let nodes = load(&self.indices.node_by_name)?;

        if is_filter_set(&req.node) {
            let mut node = nodes
                .get(&req.node)
                .cloned()
                .ok_or_else(|| DiscoveryError::NodeNotFound(req.node.clone()))?;
            node.pods.retain(|pod| {
                (!is_filter_set(&req.namespace) || pod.namespace == req.namespace)
                    && (!is_filter_set(&req.name) || pod.app_name == req.name)
            });
            for pod in node.pods.iter_mut() {
                pod.detach_node_pods();
            }
            return Ok(vec![node]);
        }

        let mut result: Vec<NodeView> = nodes
            .values()
            .cloned()
            .map(|mut node| {
                for pod in node.pods.iter_mut() {
                    pod.detach_node_pods();
                }
                node
            })
            .collect();
        result.sort_by(|a, b| a.memory.usage.total_cmp(&b.memory.usage));
        Ok(result)
    }

    /// One service by name, or every service sorted by name
    pub fn get_services(&self, req: &DiscoveryRequest) -> DiscoveryResult<Vec<ServiceView>> {
        let services = load(&self.indices.service_by_name)?;

        if is_filter_set(&req.name) {
            return services
                .get(&req.name)
                .cloned()
                .map(|svc| vec![svc])
                .ok_or_else(|| DiscoveryError::SvcNameNotFound(req.name.clone()));
        }

        let mut result: Vec<ServiceView> = services.values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }
}

/// Pods of app `name` across every map, or all pods when `name` is unset
fn select_apps<'a>(
    maps: impl IntoIterator<Item = &'a PodsByName>,
    name: &str,
) -> DiscoveryResult<Vec<PodView>> {
    let filtered = is_filter_set(name);
    let mut found = false;
    let mut pods = Vec::new();

    for apps in maps {
        if filtered {
            if let Some(app_pods) = apps.get(name) {
                found = true;
                pods.extend(app_pods.iter().cloned());
            }
        } else {
            pods.extend(apps.values().flatten().cloned());
        }
    }

    if filtered && !found {
        return Err(DiscoveryError::PodNameNotFound(name.to_string()));
    }
    Ok(pods)
}

fn load<T>(snapshot: &Snapshot<T>) -> DiscoveryResult<Arc<T>> {
    snapshot
        .current()
        .ok_or(DiscoveryError::InvalidDiscoveryCache)
}
