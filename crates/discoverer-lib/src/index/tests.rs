//! Tests for index building and publishing

use super::*;
use crate::models::{pod_key, NodeMetrics, NodeRecord, PodMetrics, PodRecord, ServicePort, ServiceRecord};
use crate::state::{group_pods_by_app, ClusterState};
use std::collections::HashMap;
use std::sync::Arc;

fn node(name: &str, cpu: f64, mem: f64) -> NodeRecord {
    NodeRecord {
        name: name.to_string(),
        internal_addr: "10.0.0.1".to_string(),
        cpu_capacity: cpu,
        cpu_remaining: cpu,
        mem_capacity: mem,
        mem_remaining: mem,
        ..Default::default()
    }
}

fn pod(name: &str, app: &str, node: &str, namespace: &str) -> PodRecord {
    PodRecord {
        name: name.to_string(),
        app_name: app.to_string(),
        node_name: node.to_string(),
        namespace: namespace.to_string(),
        ..Default::default()
    }
}

fn pod_usage(name: &str, namespace: &str, mem: f64) -> (String, PodMetrics) {
    (
        pod_key(namespace, name),
        PodMetrics {
            name: name.to_string(),
            namespace: namespace.to_string(),
            cpu: 0.1,
            mem,
        },
    )
}

fn builder(state: &Arc<ClusterState>) -> IndexBuilder {
    IndexBuilder::new(state.clone(), Arc::new(Indices::new()))
}

/// n1 and n2, svc-a with two pods on n1 (200 then 100 bytes used)
fn populated_state() -> Arc<ClusterState> {
    let state = Arc::new(ClusterState::new());

    state.reconcile_nodes(HashMap::from([
        ("n1".to_string(), node("n1", 4.0, 8e9)),
        ("n2".to_string(), node("n2", 8.0, 16e9)),
    ]));
    state.reconcile_pods(group_pods_by_app(vec![
        pod("svc-a-0", "svc-a", "n1", "default"),
        pod("svc-a-1", "svc-a", "n1", "default"),
        pod("svc-b-0", "svc-b", "n2", "prod"),
    ]));
    state.reconcile_pod_metrics(HashMap::from([
        pod_usage("svc-a-0", "default", 200.0),
        pod_usage("svc-a-1", "default", 100.0),
        pod_usage("svc-b-0", "prod", 50.0),
    ]));
    state.reconcile_services(HashMap::from([(
        "svc-a".to_string(),
        ServiceRecord {
            name: "svc-a".to_string(),
            cluster_ip: "10.96.0.10".to_string(),
            ports: vec![
                ServicePort { name: "grpc".to_string(), port: 8081 },
                ServicePort { name: "rest".to_string(), port: 8082 },
                ServicePort { name: "metrics".to_string(), port: 9090 },
            ],
            ..Default::default()
        },
    )]));

    state
}

#[tokio::test]
async fn test_node_without_pods_or_metrics() {
    let state = Arc::new(ClusterState::new());
    state.reconcile_nodes(HashMap::from([("n1".to_string(), node("n1", 4.0, 8e9))]));

    let (built, summary) = builder(&state).build().await.unwrap();
    assert_eq!(summary.nodes, 1);
    assert_eq!(summary.pods, 0);

    let n1 = &built.node_by_name["n1"];
    assert_eq!(n1.cpu.limit, 4.0);
    assert_eq!(n1.cpu.request, 0.0);
    assert_eq!(n1.cpu.usage, 0.0);
    assert_eq!(n1.memory.usage, 0.0);
    assert!(n1.pods.is_empty());
}

#[tokio::test]
async fn test_pod_leaves_sorted_by_memory_usage() {
    let state = populated_state();
    let (built, summary) = builder(&state).build().await.unwrap();
    assert_eq!(summary.pods, 3);
    assert_eq!(summary.orphan_pods, 0);

    fn names(pods: &[crate::models::PodView]) -> Vec<String> {
        pods.iter().map(|p| p.name.clone()).collect()
    }

    let expected = vec!["svc-a-1".to_string(), "svc-a-0".to_string()];
    assert_eq!(names(&built.pods_by_name["svc-a"]), expected);
    assert_eq!(names(&built.pods_by_namespace["default"]["svc-a"]), expected);
    assert_eq!(names(&built.pods_by_node["n1"]["default"]["svc-a"]), expected);
    assert_eq!(names(&built.node_by_name["n1"].pods), expected);

    let usage: Vec<f64> = built.pods_by_name["svc-a"]
        .iter()
        .map(|p| p.memory.usage)
        .collect();
    assert_eq!(usage, vec![100.0, 200.0]);
}

#[tokio::test]
async fn test_pods_point_at_pod_less_node() {
    let state = populated_state();
    let (built, _) = builder(&state).build().await.unwrap();

    let pod = &built.pods_by_name["svc-b"][0];
    let node = pod.node.as_ref().unwrap();
    assert_eq!(node.name, "n2");
    assert_eq!(node.cpu.limit, 8.0);
    assert!(node.pods.is_empty());
}

#[tokio::test]
async fn test_orphan_pods_are_indexed_without_node() {
    let state = Arc::new(ClusterState::new());
    state.reconcile_pods(group_pods_by_app(vec![pod("web-0", "web", "gone", "default")]));

    let (built, summary) = builder(&state).build().await.unwrap();
    assert_eq!(summary.orphan_pods, 1);
    assert!(built.node_by_name.is_empty());
    assert!(built.pods_by_name["web"][0].node.is_none());
    assert_eq!(built.pods_by_node["gone"]["default"]["web"].len(), 1);
}

#[tokio::test]
async fn test_pod_metrics_from_other_namespace_ignored() {
    let state = Arc::new(ClusterState::new());
    state.reconcile_pods(group_pods_by_app(vec![pod("web-0", "web", "n1", "default")]));
    state.reconcile_pod_metrics(HashMap::from([pod_usage("web-0", "other", 500.0)]));

    let (built, _) = builder(&state).build().await.unwrap();
    assert_eq!(built.pods_by_name["web"][0].memory.usage, 0.0);
}

#[tokio::test]
async fn test_same_pod_name_in_two_namespaces() {
    let state = Arc::new(ClusterState::new());
    state.reconcile_pods(group_pods_by_app(vec![
        pod("redis-0", "redis", "n1", "dev"),
        pod("redis-0", "redis", "n1", "prod"),
    ]));
    state.reconcile_pod_metrics(HashMap::from([
        pod_usage("redis-0", "dev", 100.0),
        pod_usage("redis-0", "prod", 300.0),
    ]));

    let (built, _) = builder(&state).build().await.unwrap();
    assert_eq!(built.pods_by_namespace["dev"]["redis"][0].memory.usage, 100.0);
    assert_eq!(built.pods_by_namespace["prod"]["redis"][0].memory.usage, 300.0);
}

#[tokio::test]
async fn test_node_pod_lists_sized_to_their_pods() {
    let state = populated_state();
    let mut nodes: HashMap<String, NodeRecord> = (0..100)
        .map(|i| {
            let name = format!("empty-{}", i);
            (name.clone(), node(&name, 4.0, 8e9))
        })
        .collect();
    nodes.insert("n1".to_string(), node("n1", 4.0, 8e9));
    nodes.insert("n2".to_string(), node("n2", 8.0, 16e9));
    state.reconcile_nodes(nodes);

    let builder = builder(&state);
    builder.build_and_publish().await.unwrap();
    let published = builder.indices().node_by_name.current().unwrap();

    for i in 0..100 {
        assert_eq!(published[&format!("empty-{}", i)].pods.capacity(), 0);
    }
    assert_eq!(published["n1"].pods.len(), 2);
    assert_eq!(published["n1"].pods.capacity(), 2);
}

#[tokio::test]
async fn test_node_pod_reservation_capped_by_max_pods() {
    let state = populated_state();
    let builder = IndexBuilder::new(state.clone(), Arc::new(Indices::new())).with_max_pods(1);

    let (built, _) = builder.build().await.unwrap();
    let n1 = &built.node_by_name["n1"];
    assert_eq!(n1.pods.len(), 2);
    assert_eq!(n1.pods.capacity(), 2);
}

#[tokio::test]
async fn test_node_metrics_merged() {
    let state = Arc::new(ClusterState::new());
    let mut n1 = node("n1", 4.0, 8e9);
    n1.cpu_remaining = 3.0;
    state.reconcile_nodes(HashMap::from([("n1".to_string(), n1)]));
    state.reconcile_node_metrics(HashMap::from([(
        "n1".to_string(),
        NodeMetrics {
            name: "n1".to_string(),
            cpu: 1.5,
            mem: 2e9,
            ..Default::default()
        },
    )]));

    let (built, _) = builder(&state).build().await.unwrap();
    let n1 = &built.node_by_name["n1"];
    assert_eq!(n1.cpu.request, 1.0);
    assert_eq!(n1.cpu.usage, 1.5);
    assert_eq!(n1.memory.usage, 2e9);
}

#[tokio::test]
async fn test_service_ports_filtered() {
    let state = populated_state();
    let (built, summary) = builder(&state).build().await.unwrap();
    assert_eq!(summary.services, 1);

    let ports = &built.service_by_name["svc-a"].ports;
    assert_eq!(
        ports,
        &vec![
            ServicePort { name: "grpc".to_string(), port: 8081 },
            ServicePort { name: "rest".to_string(), port: 8082 },
        ]
    );
}

#[tokio::test]
async fn test_publish_bumps_every_generation() {
    let state = populated_state();
    let builder = builder(&state);
    assert!(!builder.indices().is_ready());

    tokio_test::assert_ok!(builder.build_and_publish().await);
    assert!(builder.indices().is_ready());
    assert_eq!(builder.indices().node_by_name.generation(), 1);
    assert_eq!(builder.indices().service_by_name.generation(), 1);
}

#[tokio::test]
async fn test_republish_without_changes_is_equal() {
    let state = populated_state();
    let builder = builder(&state);

    builder.build_and_publish().await.unwrap();
    let first = builder.indices().pods_by_name.current().unwrap();
    let first_nodes = builder.indices().node_by_name.current().unwrap();

    builder.build_and_publish().await.unwrap();
    let second = builder.indices().pods_by_name.current().unwrap();
    let second_nodes = builder.indices().node_by_name.current().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(*first, *second);
    assert_eq!(*first_nodes, *second_nodes);
    assert_eq!(builder.indices().pods_by_name.generation(), 2);
}

#[tokio::test]
async fn test_removed_pods_drop_out_on_next_build() {
    let state = populated_state();
    let builder = builder(&state);
    builder.build_and_publish().await.unwrap();

    state.reconcile_pods(group_pods_by_app(vec![pod("svc-b-0", "svc-b", "n2", "prod")]));
    let summary = builder.build_and_publish().await.unwrap();
    assert_eq!(summary.pods, 1);

    let by_name = builder.indices().pods_by_name.current().unwrap();
    assert!(!by_name.contains_key("svc-a"));
    let nodes = builder.indices().node_by_name.current().unwrap();
    assert!(nodes["n1"].pods.is_empty());
}

#[test]
fn test_sort_by_memory_usage() {
    let mut pods: Vec<crate::models::PodView> = [300.0, 100.0, 200.0]
        .iter()
        .map(|mem| {
            let mut view = crate::models::PodView::default();
            view.memory.usage = *mem;
            view
        })
        .collect();

    sort_by_memory_usage(&mut pods);
    let usage: Vec<f64> = pods.iter().map(|p| p.memory.usage).collect();
    assert_eq!(usage, vec![100.0, 200.0, 300.0]);
}
