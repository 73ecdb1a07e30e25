//! Error types returned by discovery queries

use thiserror::Error;

/// Result type alias for discovery queries.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors surfaced to query callers.
///
/// Watcher failures never show up here; they are logged and forwarded on the
/// reconciliation loop's error channel instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// A snapshot the query needs has not been published yet
    #[error("invalid discovery cache: index not published yet")]
    InvalidDiscoveryCache,

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    #[error("pod name {0} not found")]
    PodNameNotFound(String),

    #[error("service name {0} not found")]
    SvcNameNotFound(String),
}

impl DiscoveryError {
    /// Returns true for the per-kind not-found variants
    pub fn is_not_found(&self) -> bool {
        !matches!(self, DiscoveryError::InvalidDiscoveryCache)
    }
}
