//! Operational HTTP surface.
//!
//! Exposes queue health and statistics for monitoring tooling, rate limited
//! per client address. This is deliberately not the product API, only the
//! controls an operator points a dashboard or probe at.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_engine::QueueAdmin;
use relay_ratelimit::{rate_limit_middleware, RateLimiter};
use tracing::info;

#[derive(Clone)]
struct OpsState {
    admin: Arc<QueueAdmin>,
}

/// Creates the operational router.
pub fn create_router(admin: Arc<QueueAdmin>, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .with_state(OpsState { admin })
}

/// Serves the operational surface until the task is aborted.
pub async fn serve(
    addr: SocketAddr,
    admin: Arc<QueueAdmin>,
    limiter: Arc<RateLimiter>,
) -> std::io::Result<()> {
    let app = create_router(admin, limiter);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "ops surface listening");
    axum::serve(listener, app).await
}

async fn health(State(state): State<OpsState>) -> Response {
    if state.admin.health_check().await {
        (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "unavailable"})),
        )
            .into_response()
    }
}

async fn stats(State(state): State<OpsState>) -> Response {
    match state.admin.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": error.to_string()})),
        )
            .into_response(),
    }
}
