//! Cluster discovery library
//!
//! This crate provides the core functionality for:
//! - Watching nodes, pods, services and their usage metrics
//! - Keeping the latest observed state in concurrent live stores
//! - Rebuilding and publishing lock-free lookup indices
//! - Answering pod, node and service queries from those indices
//! - Health checks and observability

pub mod discovery;
pub mod error;
pub mod health;
pub mod index;
pub mod models;
pub mod observability;
pub mod state;
pub mod watch;

pub use discovery::{Discoverer, DiscoveryOptions, QueryService};
pub use error::{DiscoveryError, DiscoveryResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DiscovererMetrics, StructuredLogger};
pub use watch::{ResourceWatcher, WatchError};
