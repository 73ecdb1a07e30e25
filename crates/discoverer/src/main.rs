//! Cluster discoverer
//!
//! Watches nodes, pods and services, keeps lock-free lookup indices of the
//! cluster current, and serves them over HTTP.

use anyhow::{Context, Result};
use discoverer::{api, config::DiscovererConfig};
use discoverer_lib::{watch::k8s, Discoverer};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting discoverer");

    let config = DiscovererConfig::load()?;
    info!(
        instance = %config.instance,
        namespace = %config.namespace,
        metrics_enabled = config.metrics_enabled,
        "Discoverer configured"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let mut discoverer = Discoverer::new(config.discovery_options());
    discoverer.add_watchers(k8s::watchers(
        client,
        &config.watch_config(),
        discoverer.state(),
        discoverer.health().clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut watch_errors = discoverer.start(&shutdown_tx).await?;

    // Errors are already logged and counted by the reconciliation loop
    let errors_handle = tokio::spawn(async move {
        let mut count = 0u64;
        while watch_errors.recv().await.is_some() {
            count += 1;
        }
        info!(watch_errors = count, "Watcher error channel closed");
    });

    let discoverer = Arc::new(discoverer);
    let app_state = Arc::new(api::AppState::new(discoverer.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            discoverer.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
            discoverer.log_shutdown("API server stopped");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = errors_handle.await;
    info!("Shutting down");

    Ok(())
}
