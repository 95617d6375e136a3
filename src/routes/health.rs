// src/routes/health.rs
//! API health check endpoint for the monitoring service.
//!
//! This module defines the `/health` route used by container orchestrators
//! and CI pipelines to verify that the service is running and able to
//! respond to HTTP requests. The gateway merges this subrouter into the
//! top-level API router.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    persistence: bool,
    grace_period_secs: i64,
}

/// Handle `GET /health`.
///
/// Reports whether the service is accepting reports and whether zone and
/// violation persistence is enabled, plus the signal-lost grace period in
/// force. Does not touch the database.
async fn health(State((monitor, pool)): State<AppState>) -> Json<HealthResponse> {
    let status = if monitor.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        persistence: pool.is_some(),
        grace_period_secs: monitor.settings().grace_period.num_seconds(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
