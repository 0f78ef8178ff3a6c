//! Health handler.
//!
//! - GET /  -> liveness probe, plain-text "healthy"

use axum::{http::StatusCode, response::IntoResponse};

/// `GET /`
///
/// Liveness probe for the platform's port-based health check. Always 200 and
/// never touches the bucket, the scan endpoint or the database.
pub async fn health_check() -> impl IntoResponse {
    tracing::info!("handling health check");
    (StatusCode::OK, "healthy")
}
