//! Zone management endpoints used by the safety-zone screens.
//!
//! The registry is updated first; persistence follows as a write-through
//! and a failed write is logged without undoing the in-memory change.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{error, info};

use super::{ApiError, AppState};
use crate::{store, MonitorError, NewZone, ZoneId, ZonePatch};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/zones", post(create_zone))
        .route("/zones/{zone_id}", patch(update_zone).delete(delete_zone))
        .route("/patients/{patient_id}/zones", get(list_zones))
}

async fn create_zone(
    State((monitor, pool)): State<AppState>,
    Json(new_zone): Json<NewZone>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    info!("POST /zones - patient {}", new_zone.patient_id);

    let id = monitor.add_zone(new_zone).await?;
    let zone = monitor.zone(id).await.ok_or(MonitorError::ZoneNotFound(id))?;

    if let Some(pool) = &pool {
        if let Err(e) = store::save_zone(pool, &zone).await {
            error!(zone_id = %id, "Failed to persist zone: {}", e);
        }
    }

    Ok((StatusCode::CREATED, Json(zone)))
}

async fn update_zone(
    State((monitor, pool)): State<AppState>,
    Path(zone_id): Path<ZoneId>,
    Json(zone_patch): Json<ZonePatch>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    info!("PATCH /zones/{}", zone_id);

    let zone = monitor.update_zone(zone_id, zone_patch).await?;

    if let Some(pool) = &pool {
        if let Err(e) = store::save_zone(pool, &zone).await {
            error!(zone_id = %zone_id, "Failed to persist zone update: {}", e);
        }
    }

    Ok(Json(zone))
}

async fn delete_zone(
    State((monitor, pool)): State<AppState>,
    Path(zone_id): Path<ZoneId>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    info!("DELETE /zones/{}", zone_id);

    monitor.remove_zone(zone_id).await?;

    if let Some(pool) = &pool {
        if let Err(e) = store::delete_zone(pool, zone_id).await {
            error!(zone_id = %zone_id, "Failed to delete persisted zone: {}", e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn list_zones(
    State((monitor, _)): State<AppState>,
    Path(patient_id): Path<String>,
) -> impl IntoResponse {
    // ---
    Json(monitor.zones_for_patient(&patient_id).await)
}
