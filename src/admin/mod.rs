//! Admin HTTP surface
//!
//! Read-only operational endpoints plus the drain toggle:
//! - `GET /status`: topic manager snapshot
//! - `GET /cluster`: members, self, draining set
//! - `POST /cluster/drain?node=<n>&drain=true|false`: toggle draining
//! - `GET /metrics`: Prometheus text
//!
//! Transport glue only; every answer comes straight from the core's own
//! snapshot APIs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::stats::{self, RelayMetrics};
use crate::topic::TopicManager;

/// Shared state behind the admin routes
pub struct AdminState {
    pub manager: Arc<TopicManager>,
    pub cluster: Option<Arc<Cluster>>,
    pub metrics: Arc<RelayMetrics>,
}

/// Build the admin router
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/cluster", get(cluster))
        .route("/cluster/drain", post(drain))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the admin surface until the token is cancelled
pub async fn serve(
    state: Arc<AdminState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "admin server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn status(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(state.manager.status().await)
}

async fn cluster(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    match &state.cluster {
        Some(cluster) => Json(cluster.status()).into_response(),
        None => (StatusCode::NOT_FOUND, "no cluster configured").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct DrainParams {
    node: String,
    drain: bool,
}

async fn drain(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<DrainParams>,
) -> impl IntoResponse {
    let Some(cluster) = &state.cluster else {
        return (StatusCode::NOT_FOUND, "no cluster configured").into_response();
    };
    if !cluster.set_draining(&params.node, params.drain) {
        return (StatusCode::BAD_REQUEST, "unknown node").into_response();
    }
    tracing::info!(node = %params.node, drain = params.drain, "drain toggled");
    Json(cluster.status()).into_response()
}

async fn metrics(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    stats::render(&state.metrics.snapshot())
}
