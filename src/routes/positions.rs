//! Position ingest and live tracking endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ApiError, AppState};
use crate::{PositionReport, ViolationEvent};

// ---

const DEFAULT_POSITION_LIMIT: usize = 20;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/positions", post(ingest))
        .route("/patients/{patient_id}/positions", get(recent_positions))
        .route("/patients/{patient_id}/status", get(status))
        .route("/patients/{patient_id}/monitoring", delete(stop_monitoring))
}

/// Push transport: one report per request.
async fn ingest(
    State((monitor, _)): State<AppState>,
    Json(report): Json<PositionReport>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    debug!("POST /positions - patient {}", report.patient_id);
    let ingested = monitor.ingest(report).await?;
    Ok((StatusCode::ACCEPTED, Json(ingested)))
}

/// Query parameters for recent positions
#[derive(Debug, Deserialize)]
struct PositionsQuery {
    limit: Option<usize>,
}

async fn recent_positions(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
    Query(params): Query<PositionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    let limit = params.limit.unwrap_or(DEFAULT_POSITION_LIMIT);
    Ok(Json(monitor.recent_positions(&patient_id, limit).await?))
}

async fn status(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<axum::response::Response, ApiError> {
    // ---
    Ok(match monitor.patient_status(&patient_id).await? {
        Some(status) => Json(status).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

#[derive(Serialize)]
struct StopResponse {
    patient_id: String,
    flushed: Option<ViolationEvent>,
}

async fn stop_monitoring(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    info!("DELETE /patients/{}/monitoring", patient_id);
    let flushed = monitor.stop_monitoring(&patient_id).await?;
    Ok(Json(StopResponse {
        patient_id,
        flushed,
    }))
}
