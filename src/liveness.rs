//! Liveness endpoint for the host's uptime monitor.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics::{Metrics, MetricsSnapshot};

pub const ALIVE_MESSAGE: &str = "🤖 ¡El Bot de Stock está activo 24/7!";

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/metrics", get(snapshot))
        .with_state(metrics)
}

async fn alive() -> &'static str {
    ALIVE_MESSAGE
}

async fn snapshot(State(metrics): State<Arc<Metrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, metrics: Arc<Metrics>) -> std::io::Result<()> {
    axum::serve(listener, router(metrics)).await
}

/// Bind `0.0.0.0:port` and serve on a background task.
pub async fn spawn(port: u16, metrics: Arc<Metrics>) -> std::io::Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "liveness endpoint listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = serve(listener, metrics).await {
            error!(error = %e, "liveness endpoint stopped");
        }
    }))
}
