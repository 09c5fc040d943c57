//! Status server for prompush.
//!
//! Provides liveness routes, the current target list and the bridge's own
//! operational metrics.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::status::StatusReporter;
use crate::telemetry::Telemetry;

/// Errors from the status server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub status: StatusReporter,
    pub telemetry: Telemetry,
}

/// Legacy liveness response.
#[derive(Serialize)]
struct PingResponse {
    message: &'static str,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    generation: u64,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/ping", get(ping_handler))
        .route("/healthz", get(healthz_handler))
        .route("/targets", get(targets_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

/// Bind the status listener.
pub async fn bind(bind: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = format!("{}:{}", bind, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(addr = ?addr, "Status server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Status server stopped");
    Ok(())
}

/// Liveness check kept for existing deployments.
async fn ping_handler() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

/// Liveness check.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        generation: state.status.targets().generation(),
    })
}

/// Current targets grouped by job.
async fn targets_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.status.report()).into_response()
}

/// Own telemetry in Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        state.telemetry.render(),
    )
        .into_response()
}
