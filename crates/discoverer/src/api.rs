//! HTTP API for discovery queries, health checks and Prometheus metrics

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use discoverer_lib::{
    health::ComponentStatus, Discoverer, DiscoveryError, DiscoveryRequest, NodeView, PodView,
    ServiceView,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub discoverer: Arc<Discoverer>,
}

impl AppState {
    pub fn new(discoverer: Arc<Discoverer>) -> Self {
        Self { discoverer }
    }
}

#[derive(Debug, Serialize)]
pub struct PodsResponse {
    pub pods: Vec<PodView>,
}

#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeView>,
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceView>,
}

/// Query failure mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError(DiscoveryError);

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            DiscoveryError::InvalidDiscoveryCache => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::NOT_FOUND,
        };
        debug!(status = status.as_u16(), error = %self.0, "Discovery query failed");

        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.discoverer.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Serving last known state
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once indices are published
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.discoverer.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn get_pods(
    State(state): State<Arc<AppState>>,
    Query(req): Query<DiscoveryRequest>,
) -> Result<Json<PodsResponse>, ApiError> {
    let pods = state.discoverer.get_pods(&req)?;
    Ok(Json(PodsResponse { pods }))
}

async fn get_nodes(
    State(state): State<Arc<AppState>>,
    Query(req): Query<DiscoveryRequest>,
) -> Result<Json<NodesResponse>, ApiError> {
    let nodes = state.discoverer.get_nodes(&req)?;
    Ok(Json(NodesResponse { nodes }))
}

async fn get_services(
    State(state): State<Arc<AppState>>,
    Query(req): Query<DiscoveryRequest>,
) -> Result<Json<ServicesResponse>, ApiError> {
    let services = state.discoverer.get_services(&req)?;
    Ok(Json(ServicesResponse { services }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/discoverer/pods", get(get_pods))
        .route("/v1/discoverer/nodes", get(get_nodes))
        .route("/v1/discoverer/services", get(get_services))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
