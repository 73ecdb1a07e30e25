//! Published lookup indices
//!
//! Five independent index families are rebuilt on every reconciliation tick
//! and published as immutable snapshots:
//! - nodes by name
//! - pods by node, then namespace, then app name
//! - pods by namespace, then app name
//! - pods by app name
//! - services by name
//!
//! Each family is swapped on its own. A reader that needs several families
//! for one answer must load every handle it needs first and work from that
//! fixed set; two loads of the same handle may return different generations.

mod builder;
mod snapshot;

#[cfg(test)]
mod tests;

pub use builder::{BuildSummary, BuiltIndices, IndexBuilder, DEFAULT_MAX_PODS};
pub use snapshot::Snapshot;

use crate::models::{NodeView, PodView, ServiceView};
use std::collections::HashMap;

/// app name -> pods, sorted by memory usage
pub type PodsByName = HashMap<String, Vec<PodView>>;
/// namespace -> app name -> pods
pub type PodsByNamespace = HashMap<String, PodsByName>;
/// node name -> namespace -> app name -> pods
pub type PodsByNode = HashMap<String, PodsByNamespace>;
/// node name -> node with its pods attached
pub type NodeByName = HashMap<String, NodeView>;
/// service name -> service
pub type ServiceByName = HashMap<String, ServiceView>;

/// Snapshot handles for every index family
#[derive(Debug, Default)]
pub struct Indices {
    pub node_by_name: Snapshot<NodeByName>,
    pub pods_by_node: Snapshot<PodsByNode>,
    pub pods_by_namespace: Snapshot<PodsByNamespace>,
    pub pods_by_name: Snapshot<PodsByName>,
    pub service_by_name: Snapshot<ServiceByName>,
}

impl Indices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every family, one swap each
    pub fn publish(&self, built: BuiltIndices) {
        self.node_by_name.publish(built.node_by_name);
        self.pods_by_node.publish(built.pods_by_node);
        self.pods_by_namespace.publish(built.pods_by_namespace);
        self.pods_by_name.publish(built.pods_by_name);
        self.service_by_name.publish(built.service_by_name);
    }

    /// True once every family has been published at least once
    pub fn is_ready(&self) -> bool {
        self.node_by_name.is_published()
            && self.pods_by_node.is_published()
            && self.pods_by_namespace.is_published()
            && self.pods_by_name.is_published()
            && self.service_by_name.is_published()
    }
}

/// Sort pods ascending by memory usage.
///
/// Pods with equal usage keep no particular order.
pub fn sort_by_memory_usage(pods: &mut [PodView]) {
    pods.sort_by(|a, b| a.memory.usage.total_cmp(&b.memory.usage));
}
