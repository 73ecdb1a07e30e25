//! Health check infrastructure for the discoverer
//!
//! Tracks the index builder and every watcher, and reports readiness once
//! the first set of indices has been published. A failing watcher degrades
//! health but never readiness: the published indices stay valid, only stale.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, with stale or partial data
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    /// Number of index publishes so far
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking.
///
/// Watchers register under their own names (the resource kind by default).
pub mod components {
    pub const INDEX_BUILDER: &str = "index_builder";
}

/// Shared component health and publish progress
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    generation: Arc<RwLock<u64>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record a completed publish of the indices
    pub async fn mark_published(&self, generation: u64) {
        let mut current = self.generation.write().await;
        *current = (*current).max(generation);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Status of one component, if registered
    pub async fn status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().await.get(name).map(|h| h.status)
    }

    /// Ready once indices were published and the builder is not unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let generation = *self.generation.read().await;
        let builder = self.status(components::INDEX_BUILDER).await;

        let reason = if generation == 0 {
            Some("Discovery cache not yet published".to_string())
        } else if builder == Some(ComponentStatus::Unhealthy) {
            Some("Index builder unhealthy".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            generation,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::kinds;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_watcher_degrades_overall_status() {
        let registry = HealthRegistry::new();
        registry.register(components::INDEX_BUILDER).await;
        registry.register(kinds::POD).await;

        registry.set_degraded(kinds::POD, "failed to list pods").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            registry.status(kinds::POD).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_unhealthy_component_wins() {
        let registry = HealthRegistry::new();
        registry.set_degraded(kinds::POD, "failed to list pods").await;
        registry
            .set_unhealthy(components::INDEX_BUILDER, "sort pass panicked")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_not_ready_before_first_publish() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert_eq!(readiness.generation, 0);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_ready_after_publish_even_with_failing_watcher() {
        let registry = HealthRegistry::new();
        registry.set_degraded(kinds::NODE, "failed to list nodes").await;
        registry.mark_published(3).await;
        registry.mark_published(2).await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert_eq!(readiness.generation, 3);
    }

    #[tokio::test]
    async fn test_not_ready_when_builder_unhealthy() {
        let registry = HealthRegistry::new();
        registry.mark_published(1).await;
        registry
            .set_unhealthy(components::INDEX_BUILDER, "sort pass panicked")
            .await;

        assert!(!registry.readiness().await.ready);
    }
}
