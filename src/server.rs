//! HTTP server setup.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::session::SessionOrchestrator;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    /// Capacity of each subscriber's event channel.
    pub channel_capacity: usize,
    pub keep_alive_interval_seconds: u64,
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    // SSE streaming routes - no request timeout (sessions outlive it)
    let streaming_routes = Router::new()
        .route("/streams", post(handlers::v1::create_stream))
        .with_state(state.clone());

    // Regular API routes - with request timeout
    let api_routes = Router::new()
        .route(
            "/streams/{session_id}/stop",
            post(handlers::v1::stop_stream),
        )
        .route("/queries", post(handlers::v1::structured_query))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )));

    let api_v1 = Router::new().merge(streaming_routes).merge(api_routes);

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api/v1", api_v1)
}
