//! Kubernetes-backed resource sources
//!
//! Each source lists one resource kind through the API server and converts
//! the objects into discoverer records. Usage samples come from the
//! `metrics.k8s.io/v1beta1` API, read as dynamic objects.

use super::{parse_quantity, PollingWatcher, ResourceSource, ResourceWatcher, DEFAULT_WATCH_INTERVAL};
use crate::health::HealthRegistry;
use crate::models::{pod_key, NodeMetrics, NodeRecord, PodMetrics, PodRecord, ServicePort, ServiceRecord};
use crate::state::{group_pods_by_app, kinds, ClusterState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Label carrying a pod's app name
pub const APP_LABEL: &str = "app";

const METRICS_GROUP: &str = "metrics.k8s.io";
const METRICS_VERSION: &str = "v1beta1";

/// Scope and selectors passed verbatim to list calls
#[derive(Debug, Clone, Default)]
pub struct Selector {
    /// Namespace for namespaced kinds; empty means all namespaces
    pub namespace: String,
    pub labels: String,
    pub fields: String,
}

impl Selector {
    fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if !self.labels.is_empty() {
            params = params.labels(&self.labels);
        }
        if !self.fields.is_empty() {
            params = params.fields(&self.fields);
        }
        trace!(labels = %self.labels, fields = %self.fields, "Built ListParams");
        params
    }

    fn namespaced<K>(&self, client: Client) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        if self.namespace.is_empty() {
            Api::all(client)
        } else {
            Api::namespaced(client, &self.namespace)
        }
    }
}

/// Nodes, keyed by name
pub struct NodeSource {
    client: Client,
    selector: Selector,
}

impl NodeSource {
    pub fn new(client: Client, selector: Selector) -> Self {
        Self { client, selector }
    }
}

#[async_trait]
impl ResourceSource for NodeSource {
    type State = HashMap<String, NodeRecord>;

    fn kind(&self) -> &'static str {
        kinds::NODE
    }

    async fn list(&self) -> Result<Self::State> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&self.selector.list_params())
            .await
            .context("failed to list nodes")?;

        Ok(nodes
            .items
            .iter()
            .filter_map(node_record)
            .map(|n| (n.name.clone(), n))
            .collect())
    }
}

/// Running pods, grouped by app name
pub struct PodSource {
    client: Client,
    selector: Selector,
}

impl PodSource {
    pub fn new(client: Client, selector: Selector) -> Self {
        Self { client, selector }
    }
}

#[async_trait]
impl ResourceSource for PodSource {
    type State = HashMap<String, Vec<PodRecord>>;

    fn kind(&self) -> &'static str {
        kinds::POD
    }

    async fn list(&self) -> Result<Self::State> {
        let api: Api<Pod> = self.selector.namespaced(self.client.clone());
        let pods = api
            .list(&self.selector.list_params())
            .await
            .context("failed to list pods")?;

        Ok(group_pods_by_app(pods.items.iter().filter_map(pod_record)))
    }
}

/// Services, keyed by name
pub struct ServiceSource {
    client: Client,
    selector: Selector,
}

impl ServiceSource {
    pub fn new(client: Client, selector: Selector) -> Self {
        Self { client, selector }
    }
}

#[async_trait]
impl ResourceSource for ServiceSource {
    type State = HashMap<String, ServiceRecord>;

    fn kind(&self) -> &'static str {
        kinds::SERVICE
    }

    async fn list(&self) -> Result<Self::State> {
        let api: Api<Service> = self.selector.namespaced(self.client.clone());
        let services = api
            .list(&self.selector.list_params())
            .await
            .context("failed to list services")?;

        Ok(services
            .items
            .iter()
            .filter_map(service_record)
            .map(|s| (s.name.clone(), s))
            .collect())
    }
}

/// Node usage samples, keyed by node name
pub struct NodeMetricsSource {
    client: Client,
    selector: Selector,
}

impl NodeMetricsSource {
    pub fn new(client: Client, selector: Selector) -> Self {
        Self { client, selector }
    }
}

#[async_trait]
impl ResourceSource for NodeMetricsSource {
    type State = HashMap<String, NodeMetrics>;

    fn kind(&self) -> &'static str {
        kinds::NODE_METRICS
    }

    async fn list(&self) -> Result<Self::State> {
        let ar = metrics_resource("NodeMetrics", "nodes");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let samples = api
            .list(&self.selector.list_params())
            .await
            .context("failed to list node metrics")?;

        Ok(samples
            .items
            .iter()
            .filter_map(node_metrics)
            .map(|m| (m.name.clone(), m))
            .collect())
    }
}

/// Pod usage samples, keyed by `namespace/name`
pub struct PodMetricsSource {
    client: Client,
    selector: Selector,
}

impl PodMetricsSource {
    pub fn new(client: Client, selector: Selector) -> Self {
        Self { client, selector }
    }
}

#[async_trait]
impl ResourceSource for PodMetricsSource {
    type State = HashMap<String, PodMetrics>;

    fn kind(&self) -> &'static str {
        kinds::POD_METRICS
    }

    async fn list(&self) -> Result<Self::State> {
        let ar = metrics_resource("PodMetrics", "pods");
        let api: Api<DynamicObject> = if self.selector.namespace.is_empty() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), &self.selector.namespace, &ar)
        };
        let samples = api
            .list(&self.selector.list_params())
            .await
            .context("failed to list pod metrics")?;

        Ok(samples
            .items
            .iter()
            .filter_map(pod_metrics)
            .map(|m| (pod_key(&m.namespace, &m.name), m))
            .collect())
    }
}

/// Selectors and timing for the full set of Kubernetes watchers
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval: Duration,
    pub nodes: Selector,
    pub pods: Selector,
    pub services: Selector,
    /// Also poll `metrics.k8s.io` for usage samples
    pub metrics_enabled: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_WATCH_INTERVAL,
            nodes: Selector::default(),
            pods: Selector::default(),
            services: Selector::default(),
            metrics_enabled: true,
        }
    }
}

/// Build one polling watcher per resource kind, each feeding `state`
pub fn watchers(
    client: Client,
    config: &WatchConfig,
    state: Arc<ClusterState>,
    health: HealthRegistry,
) -> Vec<Arc<dyn ResourceWatcher>> {
    let mut watchers: Vec<Arc<dyn ResourceWatcher>> = Vec::with_capacity(5);

    let nodes = {
        let state = state.clone();
        PollingWatcher::new(NodeSource::new(client.clone(), config.nodes.clone()))
            .on_reconcile(move |nodes| state.reconcile_nodes(nodes))
    };
    watchers.push(Arc::new(polling(nodes, config, &health)));

    let pods = {
        let state = state.clone();
        PollingWatcher::new(PodSource::new(client.clone(), config.pods.clone()))
            .on_reconcile(move |pods| state.reconcile_pods(pods))
    };
    watchers.push(Arc::new(polling(pods, config, &health)));

    let services = {
        let state = state.clone();
        PollingWatcher::new(ServiceSource::new(client.clone(), config.services.clone()))
            .on_reconcile(move |services| state.reconcile_services(services))
    };
    watchers.push(Arc::new(polling(services, config, &health)));

    if config.metrics_enabled {
        // The metrics API does not support the core field selectors
        let node_selector = Selector {
            fields: String::new(),
            ..config.nodes.clone()
        };
        let node_metrics = {
            let state = state.clone();
            PollingWatcher::new(NodeMetricsSource::new(client.clone(), node_selector))
                .on_reconcile(move |samples| state.reconcile_node_metrics(samples))
        };
        watchers.push(Arc::new(polling(node_metrics, config, &health)));

        let pod_selector = Selector {
            fields: String::new(),
            ..config.pods.clone()
        };
        let pod_metrics = PollingWatcher::new(PodMetricsSource::new(client, pod_selector))
            .on_reconcile(move |samples| state.reconcile_pod_metrics(samples));
        watchers.push(Arc::new(polling(pod_metrics, config, &health)));
    }

    watchers
}

fn polling<S: ResourceSource>(
    watcher: PollingWatcher<S>,
    config: &WatchConfig,
    health: &HealthRegistry,
) -> PollingWatcher<S> {
    watcher
        .interval(config.interval)
        .health(health.clone())
        .on_error(|err| debug!(watcher = %err.watcher, error = %err, "List failed, keeping last state"))
}

fn metrics_resource(kind: &str, plural: &str) -> ApiResource {
    let gvk = GroupVersionKind::gvk(METRICS_GROUP, METRICS_VERSION, kind);
    ApiResource::from_gvk_with_plural(&gvk, plural)
}

fn quantity(resources: Option<&BTreeMap<String, Quantity>>, key: &str) -> f64 {
    resources
        .and_then(|r| r.get(key))
        .map(|q| parse_quantity(&q.0))
        .unwrap_or_default()
}

fn usage_quantity(usage: &Value, key: &str) -> f64 {
    usage
        .get(key)
        .and_then(Value::as_str)
        .map(parse_quantity)
        .unwrap_or_default()
}

/// App name of a pod: the `app` label, else the name minus its last
/// `-` segment
pub fn app_name(pod_name: &str, labels: Option<&BTreeMap<String, String>>) -> String {
    if let Some(app) = labels
        .and_then(|l| l.get(APP_LABEL))
        .filter(|app| !app.is_empty())
    {
        return app.clone();
    }

    match pod_name.rsplit_once('-') {
        Some((prefix, _)) if !prefix.is_empty() => prefix.to_string(),
        _ => pod_name.to_string(),
    }
}

pub fn node_record(node: &Node) -> Option<NodeRecord> {
    let name = node.metadata.name.clone()?;
    let status = node.status.as_ref();
    let capacity = status.and_then(|s| s.capacity.as_ref());
    let allocatable = status.and_then(|s| s.allocatable.as_ref());

    let address = |kind: &str| {
        status
            .and_then(|s| s.addresses.as_ref())
            .and_then(|addrs| addrs.iter().find(|a| a.type_ == kind))
            .map(|a| a.address.clone())
            .unwrap_or_default()
    };

    Some(NodeRecord {
        name,
        internal_addr: address("InternalIP"),
        external_addr: address("ExternalIP"),
        cpu_capacity: quantity(capacity, "cpu"),
        cpu_remaining: quantity(allocatable, "cpu"),
        mem_capacity: quantity(capacity, "memory"),
        mem_remaining: quantity(allocatable, "memory"),
    })
}

/// Convert a running pod; terminating and non-running pods are skipped
pub fn pod_record(pod: &Pod) -> Option<PodRecord> {
    if pod.metadata.deletion_timestamp.is_some() {
        return None;
    }
    let status = pod.status.as_ref()?;
    if status.phase.as_deref() != Some("Running") {
        return None;
    }
    let name = pod.metadata.name.clone()?;
    let spec = pod.spec.as_ref()?;

    let mut record = PodRecord {
        app_name: app_name(&name, pod.metadata.labels.as_ref()),
        name,
        node_name: spec.node_name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        ip: status.pod_ip.clone().unwrap_or_default(),
        ..Default::default()
    };

    for container in &spec.containers {
        if let Some(resources) = container.resources.as_ref() {
            let limits = resources.limits.as_ref();
            let requests = resources.requests.as_ref();
            record.cpu_limit += quantity(limits, "cpu");
            record.cpu_request += quantity(requests, "cpu");
            record.mem_limit += quantity(limits, "memory");
            record.mem_request += quantity(requests, "memory");
        }
    }

    Some(record)
}

pub fn service_record(svc: &Service) -> Option<ServiceRecord> {
    let name = svc.metadata.name.clone()?;
    let spec = svc.spec.as_ref();

    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ServicePort {
                    name: p.name.clone().unwrap_or_default(),
                    port: p.port,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ServiceRecord {
        name,
        cluster_ip: spec.and_then(|s| s.cluster_ip.clone()).unwrap_or_default(),
        cluster_ips: spec.and_then(|s| s.cluster_ips.clone()).unwrap_or_default(),
        ports,
        labels: svc.metadata.labels.clone().unwrap_or_default(),
        annotations: svc.metadata.annotations.clone().unwrap_or_default(),
    })
}

pub fn node_metrics(obj: &DynamicObject) -> Option<NodeMetrics> {
    let name = obj.metadata.name.clone()?;
    let usage = obj.data.get("usage")?;

    Some(NodeMetrics {
        name,
        cpu: usage_quantity(usage, "cpu"),
        mem: usage_quantity(usage, "memory"),
        pods: usage_quantity(usage, "pods") as u32,
        ephemeral_storage: usage_quantity(usage, "ephemeral-storage"),
    })
}

/// Pod usage averaged over its containers
pub fn pod_metrics(obj: &DynamicObject) -> Option<PodMetrics> {
    let name = obj.metadata.name.clone()?;
    let containers = obj.data.get("containers")?.as_array()?;

    let mut cpu = 0.0;
    let mut mem = 0.0;
    let mut count = 0usize;
    for usage in containers.iter().filter_map(|c| c.get("usage")) {
        cpu += usage_quantity(usage, "cpu");
        mem += usage_quantity(usage, "memory");
        count += 1;
    }
    if count > 0 {
        cpu /= count as f64;
        mem /= count as f64;
    }

    Some(PodMetrics {
        name,
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        cpu,
        mem,
    })
}
