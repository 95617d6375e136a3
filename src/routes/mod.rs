//! HTTP gateway for the monitoring service.
//!
//! Each sibling module exports a subrouter; this module merges them,
//! attaches the shared state and owns the error-to-response mapping so
//! handlers can simply use `?` on [`MonitorError`].

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use serde_json::json;
use sqlx::PgPool;

use crate::{Monitor, MonitorError};

mod health;
mod positions;
mod violations;
mod zones;

// ---

/// Shared handler state: the monitor plus the optional persistence pool.
pub type AppState = (Monitor, Option<PgPool>);

pub fn router(monitor: Monitor, pool: Option<PgPool>) -> Router {
    // ---
    Router::new()
        .merge(zones::router())
        .merge(positions::router())
        .merge(violations::router())
        .merge(health::router())
        .with_state((monitor, pool))
}

/// A [`MonitorError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            MonitorError::Validation(_) | MonitorError::InvalidCoordinates { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            MonitorError::StaleReport { .. } => StatusCode::CONFLICT,
            MonitorError::ZoneNotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
