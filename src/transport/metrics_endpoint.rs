#![cfg(feature = "http")]

use crate::server::metrics::Metrics;
use crate::transport::shutdown::ShutdownListener;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Admin router exposing metrics and a health check
pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Bind the admin endpoint, returning the bound address and the serving task
pub async fn spawn_admin(
    addr: &str,
    metrics: Arc<Metrics>,
    mut shutdown: ShutdownListener,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin endpoint {}", addr))?;
    let local = listener.local_addr()?;
    info!("Admin endpoint listening on http://{}", local);

    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, metrics_router(metrics))
            .with_graceful_shutdown(async move { shutdown.recv().await })
            .await;
        if let Err(e) = served {
            tracing::error!("Admin endpoint failed: {}", e);
        }
    });
    Ok((local, handle))
}

/// GET /metrics - Returns current metrics
async fn get_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (StatusCode::OK, Json(metrics.snapshot()))
}

/// GET /health - Health check endpoint
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "framed-rooms"
        })),
    )
}
