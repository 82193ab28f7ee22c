//! HTTP request handlers.

pub mod problem_details;
pub mod v1;

use axum::Json;
use serde_json::json;

/// GET /livez
///
/// Liveness probe. Always returns 200 while the process is up.
pub async fn livez() -> &'static str {
    "ok"
}

/// GET /readyz
///
/// Readiness probe. The server accepts requests as soon as it is built.
pub async fn readyz() -> &'static str {
    "ok"
}

/// GET /version
pub async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
