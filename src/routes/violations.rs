//! Violation queries backing the alert and safety-zone dashboards.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiError, AppState};
use crate::TimeRange;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/patients/{patient_id}/violations", get(history))
        .route("/patients/{patient_id}/violations/open", get(open))
        .route("/patients/{patient_id}/violations/counts", get(counts))
        .route(
            "/patients/{patient_id}/violations/counts/reset",
            post(reset_counts),
        )
}

/// Query parameters for filtering violation history
#[derive(Debug, Deserialize)]
struct HistoryQuery {
    /// Timestamp range filter (e.g., "2026-02-04T00:00:00Z,2026-02-05T00:00:00Z")
    range: Option<String>,
    limit: Option<usize>,
}

async fn history(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    let range = match params.range.as_deref() {
        Some(raw) => TimeRange::parse(raw)?,
        None => TimeRange::default(),
    };

    let mut events = monitor.violation_history(&patient_id, range).await?;
    if let Some(limit) = params.limit {
        // Keep the most recent ones
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    Ok(Json(events))
}

async fn open(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(monitor.open_violations(&patient_id).await?))
}

async fn counts(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(monitor.violation_counts(&patient_id).await?))
}

async fn reset_counts(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    info!("POST /patients/{}/violations/counts/reset", patient_id);
    monitor.reset_violation_counts(&patient_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
