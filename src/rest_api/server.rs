//! Axum HTTP server for probes and metrics

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};

/// Liveness endpoint handler
async fn healthz() -> &'static str {
    "ok"
}

/// Readiness endpoint handler
async fn readyz() -> &'static str {
    "ok"
}

/// Metrics endpoint handler
async fn metrics_handler() -> String {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY).unwrap();
    buffer
}

/// Run the probe and metrics server
pub async fn run_server(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    info!("Probe and metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{healthz, metrics_handler, readyz};

    #[tokio::test]
    async fn probes_answer_ok() {
        assert_eq!(healthz().await, "ok");
        assert_eq!(readyz().await, "ok");
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_the_failure_gauge() {
        let body = metrics_handler().await;
        assert!(body.contains("gaudi_deviceconfig_reconciliation_failed"));
    }
}
