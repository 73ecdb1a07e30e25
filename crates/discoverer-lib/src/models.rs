//! Core data models for the discoverer
//!
//! Records are written by the watcher callbacks and hold the latest observed
//! state of one resource. Views are derived from records on every index build
//! and are what queries hand back to callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Node state reported by the node watcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub internal_addr: String,
    pub external_addr: String,
    /// CPU capacity in cores
    pub cpu_capacity: f64,
    /// Allocatable CPU in cores
    pub cpu_remaining: f64,
    /// Memory capacity in bytes
    pub mem_capacity: f64,
    /// Allocatable memory in bytes
    pub mem_remaining: f64,
}

/// Node usage sample reported by the node-metrics watcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub name: String,
    pub cpu: f64,
    pub mem: f64,
    pub pods: u32,
    pub ephemeral_storage: f64,
}

/// Pod state reported by the pod watcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
    pub app_name: String,
    pub node_name: String,
    pub namespace: String,
    pub ip: String,
    pub cpu_limit: f64,
    pub cpu_request: f64,
    pub mem_limit: f64,
    pub mem_request: f64,
}

/// Live-store key of a pod usage sample
pub fn pod_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Pod usage sample, averaged over the pod's containers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodMetrics {
    pub name: String,
    pub namespace: String,
    pub cpu: f64,
    pub mem: f64,
}

/// A named service port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: i32,
}

/// Service state reported by the service watcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub cluster_ip: String,
    pub cluster_ips: Vec<String>,
    pub ports: Vec<ServicePort>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Limit, request and live usage of one resource (cores or bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub limit: f64,
    pub request: f64,
    pub usage: f64,
}

/// Aggregated node, rebuilt every cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub name: String,
    pub internal_addr: String,
    pub external_addr: String,
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    pub pods: Vec<PodView>,
}

impl NodeView {
    /// Merge a node record with its usage sample.
    ///
    /// `request` is what the scheduler has already handed out
    /// (capacity minus allocatable), independent of live usage.
    /// The pod list starts empty; the index builder sizes it.
    pub fn merge(node: &NodeRecord, metrics: Option<&NodeMetrics>) -> Self {
        Self {
            name: node.name.clone(),
            internal_addr: node.internal_addr.clone(),
            external_addr: node.external_addr.clone(),
            cpu: ResourceUsage {
                limit: node.cpu_capacity,
                request: node.cpu_capacity - node.cpu_remaining,
                usage: metrics.map(|m| m.cpu).unwrap_or_default(),
            },
            memory: ResourceUsage {
                limit: node.mem_capacity,
                request: node.mem_capacity - node.mem_remaining,
                usage: metrics.map(|m| m.mem).unwrap_or_default(),
            },
            pods: Vec::new(),
        }
    }
}

/// Aggregated pod, rebuilt every cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodView {
    pub name: String,
    pub app_name: String,
    pub namespace: String,
    pub ip: String,
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    /// Node the pod is scheduled on, `None` when the node is not (yet) known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<Arc<NodeView>>,
}

impl PodView {
    pub fn merge(pod: &PodRecord, metrics: Option<&PodMetrics>, node: Option<Arc<NodeView>>) -> Self {
        Self {
            name: pod.name.clone(),
            app_name: pod.app_name.clone(),
            namespace: pod.namespace.clone(),
            ip: pod.ip.clone(),
            cpu: ResourceUsage {
                limit: pod.cpu_limit,
                request: pod.cpu_request,
                usage: metrics.map(|m| m.cpu).unwrap_or_default(),
            },
            memory: ResourceUsage {
                limit: pod.mem_limit,
                request: pod.mem_request,
                usage: metrics.map(|m| m.mem).unwrap_or_default(),
            },
            node,
        }
    }

    /// Drop any pod list carried by the embedded node.
    pub fn detach_node_pods(&mut self) {
        if let Some(node) = self.node.as_mut() {
            if !node.pods.is_empty() {
                Arc::make_mut(node).pods = Vec::new();
            }
        }
    }
}

/// Aggregated service, rebuilt every cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceView {
    pub name: String,
    pub cluster_ip: String,
    pub cluster_ips: Vec<String>,
    pub ports: Vec<ServicePort>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Port names exposed to callers; every other port is dropped
pub const API_PORT_NAMES: &[&str] = &["grpc", "rest"];

impl ServiceView {
    pub fn from_record(svc: &ServiceRecord) -> Self {
        Self {
            name: svc.name.clone(),
            cluster_ip: svc.cluster_ip.clone(),
            cluster_ips: svc.cluster_ips.clone(),
            ports: extract_api_ports(&svc.ports),
            labels: svc.labels.clone(),
            annotations: svc.annotations.clone(),
        }
    }
}

/// Keep only ports named exactly `grpc` or `rest`, in their original order.
pub fn extract_api_ports(ports: &[ServicePort]) -> Vec<ServicePort> {
    ports
        .iter()
        .filter(|p| API_PORT_NAMES.contains(&p.name.as_str()))
        .cloned()
        .collect()
}

/// Query filters; an empty string or `*` means "no filter"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryRequest {
    pub node: String,
    pub namespace: String,
    pub name: String,
}

impl DiscoveryRequest {
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Returns true when `filter` selects a specific key
pub fn is_filter_set(filter: &str) -> bool {
    !filter.is_empty() && filter != "*"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, port: i32) -> ServicePort {
        ServicePort {
            name: name.to_string(),
            port,
        }
    }

    #[test]
    fn test_extract_api_ports_keeps_grpc_and_rest_in_order() {
        let ports = vec![
            port("grpc", 8081),
            port("rest", 8082),
            port("readiness", 3000),
            port("liveness", 3001),
        ];

        assert_eq!(
            extract_api_ports(&ports),
            vec![port("grpc", 8081), port("rest", 8082)]
        );
    }

    #[test]
    fn test_extract_api_ports_is_case_sensitive() {
        let ports = vec![port("GRPC", 8081), port("pprof", 6060), port("rest", 8082)];
        assert_eq!(extract_api_ports(&ports), vec![port("rest", 8082)]);
    }

    #[test]
    fn test_node_view_merge_without_metrics() {
        let node = NodeRecord {
            name: "n1".to_string(),
            cpu_capacity: 4.0,
            cpu_remaining: 3.0,
            mem_capacity: 1024.0,
            mem_remaining: 512.0,
            ..Default::default()
        };

        let view = NodeView::merge(&node, None);
        assert_eq!(view.cpu.limit, 4.0);
        assert_eq!(view.cpu.request, 1.0);
        assert_eq!(view.cpu.usage, 0.0);
        assert_eq!(view.memory.request, 512.0);
        assert!(view.pods.is_empty());
        assert_eq!(view.pods.capacity(), 0);
    }

    #[test]
    fn test_detach_node_pods() {
        let mut node = NodeView {
            name: "n1".to_string(),
            ..Default::default()
        };
        node.pods.push(PodView::default());

        let mut pod = PodView {
            name: "p1".to_string(),
            node: Some(Arc::new(node)),
            ..Default::default()
        };
        pod.detach_node_pods();

        let node = pod.node.as_ref().unwrap();
        assert_eq!(node.name, "n1");
        assert!(node.pods.is_empty());
    }

    #[test]
    fn test_is_filter_set() {
        assert!(!is_filter_set(""));
        assert!(!is_filter_set("*"));
        assert!(is_filter_set("n1"));
    }
}
