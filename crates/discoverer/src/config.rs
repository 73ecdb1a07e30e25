//! Discoverer configuration

use anyhow::Result;
use discoverer_lib::index::DEFAULT_MAX_PODS;
use discoverer_lib::watch::k8s::{Selector, WatchConfig};
use discoverer_lib::DiscoveryOptions;
use serde::Deserialize;
use std::time::Duration;

/// Discoverer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiscovererConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for queries, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Reconciliation interval in seconds
    #[serde(default = "default_interval")]
    pub discover_duration_secs: u64,

    /// Polling interval of each watcher in seconds
    #[serde(default = "default_interval")]
    pub watch_interval_secs: u64,

    #[serde(default = "default_max_pods")]
    pub max_pods: usize,

    /// Namespace scope for namespaced kinds; empty means all namespaces
    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub node_labels: String,
    #[serde(default)]
    pub node_fields: String,
    #[serde(default)]
    pub pod_labels: String,
    #[serde(default)]
    pub pod_fields: String,
    #[serde(default)]
    pub service_labels: String,
    #[serde(default)]
    pub service_fields: String,

    /// Poll metrics.k8s.io for node and pod usage
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_instance() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "discoverer".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    2
}

fn default_max_pods() -> usize {
    DEFAULT_MAX_PODS
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for DiscovererConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: default_api_port(),
            discover_duration_secs: default_interval(),
            watch_interval_secs: default_interval(),
            max_pods: default_max_pods(),
            namespace: String::new(),
            node_labels: String::new(),
            node_fields: String::new(),
            pod_labels: String::new(),
            pod_fields: String::new(),
            service_labels: String::new(),
            service_fields: String::new(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl DiscovererConfig {
    /// Load configuration from `DISCOVERER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("DISCOVERER").try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder().add_source(source).build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn discover_interval(&self) -> Duration {
        Duration::from_secs(self.discover_duration_secs.max(1))
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs.max(1))
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            instance: self.instance.clone(),
            discover_interval: self.discover_interval(),
            max_pods: self.max_pods,
        }
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            interval: self.watch_interval(),
            // Nodes are cluster scoped
            nodes: Selector {
                namespace: String::new(),
                labels: self.node_labels.clone(),
                fields: self.node_fields.clone(),
            },
            pods: Selector {
                namespace: self.namespace.clone(),
                labels: self.pod_labels.clone(),
                fields: self.pod_fields.clone(),
            },
            services: Selector {
                namespace: self.namespace.clone(),
                labels: self.service_labels.clone(),
                fields: self.service_fields.clone(),
            },
            metrics_enabled: self.metrics_enabled,
        }
    }
}
