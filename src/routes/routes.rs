//! Defines the HTTP surface of the scanner.
//!
//! The service does its work in background loops; the only route is a
//! liveness probe:
//!
//! - `GET /` — returns `healthy`

use crate::handlers::health_handlers::health_check;
use axum::{Router, routing::get};

/// Build and return the router.
pub fn routes() -> Router {
    Router::new().route("/", get(health_check))
}
