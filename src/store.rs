//! PostgreSQL persistence for zones and the closed violation log.
//!
//! The in-memory registry stays authoritative while the service runs; the
//! database lets zones survive restarts and keeps the durable record of
//! closed violations. Open events are never written.

use anyhow::{anyhow, Result};
use chrono::NaiveTime;
use sqlx::PgPool;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ActiveHours, Coordinates, ViolationEvent, Zone, ZoneId};

// ---

/// Row shape of the `zones` table.
#[derive(Debug, sqlx::FromRow)]
struct ZoneRow {
    // ---
    id: Uuid,
    patient_id: String,
    name: String,
    kind: String,
    center_lat: f64,
    center_lng: f64,
    radius_meters: f64,
    window_start: Option<NaiveTime>,
    window_end: Option<NaiveTime>,
}

impl TryFrom<ZoneRow> for Zone {
    type Error = anyhow::Error;

    fn try_from(row: ZoneRow) -> Result<Self> {
        // ---
        let active_hours = match (row.window_start, row.window_end) {
            (Some(start), Some(end)) => ActiveHours::Window { start, end }.normalized(),
            (None, None) => ActiveHours::Always,
            _ => return Err(anyhow!("zone {} has a half-defined active window", row.id)),
        };

        Ok(Zone {
            id: row.id,
            patient_id: row.patient_id,
            name: row.name,
            kind: row.kind.parse()?,
            center: Coordinates::new(row.center_lat, row.center_lng),
            radius_meters: row.radius_meters,
            active_hours,
        })
    }
}

fn window_columns(hours: &ActiveHours) -> (Option<NaiveTime>, Option<NaiveTime>) {
    match *hours {
        ActiveHours::Always => (None, None),
        ActiveHours::Window { start, end } => (Some(start), Some(end)),
    }
}

/// Load every stored zone, oldest first so insertion order is preserved.
pub async fn load_zones(pool: &PgPool) -> Result<Vec<Zone>> {
    // ---
    let rows: Vec<ZoneRow> = sqlx::query_as(
        r#"
        SELECT id, patient_id, name, kind, center_lat, center_lng,
               radius_meters, window_start, window_end
        FROM zones
        ORDER BY created_at, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut zones = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id;
        match Zone::try_from(row) {
            Ok(zone) => zones.push(zone),
            Err(e) => warn!(zone_id = %id, "Skipping unreadable zone row: {}", e),
        }
    }
    info!("Loaded {} zone(s) from database", zones.len());
    Ok(zones)
}

/// Insert or update a zone.
pub async fn save_zone(pool: &PgPool, zone: &Zone) -> Result<(), sqlx::Error> {
    // ---
    let (window_start, window_end) = window_columns(&zone.active_hours);

    sqlx::query(
        r#"
        INSERT INTO zones (
            id, patient_id, name, kind, center_lat, center_lng,
            radius_meters, window_start, window_end
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            name          = EXCLUDED.name,
            kind          = EXCLUDED.kind,
            center_lat    = EXCLUDED.center_lat,
            center_lng    = EXCLUDED.center_lng,
            radius_meters = EXCLUDED.radius_meters,
            window_start  = EXCLUDED.window_start,
            window_end    = EXCLUDED.window_end,
            updated_at    = now()
        "#,
    )
    .bind(zone.id)
    .bind(&zone.patient_id)
    .bind(&zone.name)
    .bind(zone.kind.as_str())
    .bind(zone.center.latitude)
    .bind(zone.center.longitude)
    .bind(zone.radius_meters)
    .bind(window_start)
    .bind(window_end)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_zone(pool: &PgPool, id: ZoneId) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query("DELETE FROM zones WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Append a closed event to the durable log. Open events are ignored.
pub async fn append_closed_event(
    pool: &PgPool,
    event: &ViolationEvent,
) -> Result<bool, sqlx::Error> {
    // ---
    let (Some(exited_at), Some(closed_by)) = (event.exited_at, event.closed_by) else {
        return Ok(false);
    };

    sqlx::query(
        r#"
        INSERT INTO violation_events (
            id, patient_id, zone_id, reason, severity,
            entered_at, exited_at, closed_by
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(event.id)
    .bind(&event.patient_id)
    .bind(event.zone_id)
    .bind(event.reason.as_str())
    .bind(event.severity.as_str())
    .bind(event.entered_at)
    .bind(exited_at)
    .bind(closed_by.as_str())
    .execute(pool)
    .await?;

    Ok(true)
}

/// Append `events` directly, bypassing the broadcast stream. Used for the
/// shutdown flush, which the detached archiver may not live to see.
/// Returns how many closed events were written.
pub async fn archive_events(pool: &PgPool, events: &[ViolationEvent]) -> usize {
    // ---
    let mut written = 0;
    for event in events {
        match append_closed_event(pool, event).await {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => error!(event_id = %event.id, "Failed to archive violation: {}", e),
        }
    }
    written
}

/// Write closed events from the monitor's broadcast stream until it ends.
pub async fn run_archiver(pool: PgPool, mut events: broadcast::Receiver<ViolationEvent>) {
    // ---
    loop {
        match events.recv().await {
            Ok(event) => match append_closed_event(&pool, &event).await {
                Ok(true) => debug!(event_id = %event.id, "Archived closed violation"),
                Ok(false) => {}
                Err(e) => error!(event_id = %event.id, "Failed to archive violation: {}", e),
            },
            Err(RecvError::Lagged(missed)) => {
                warn!("Archiver fell behind, {} violation event(s) not archived", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Archiver stopped");
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::ZoneKind;

    fn create_test_row() -> ZoneRow {
        ZoneRow {
            id: Uuid::new_v4(),
            patient_id: "P001".to_string(),
            name: "Périmètre autorisé - Centre ville".to_string(),
            kind: "allowed".to_string(),
            center_lat: 48.8566,
            center_lng: 2.3522,
            radius_meters: 1000.0,
            window_start: NaiveTime::from_hms_opt(8, 0, 0),
            window_end: NaiveTime::from_hms_opt(20, 0, 0),
        }
    }

    /// Needs a reachable PostgreSQL at `DATABASE_URL`.
    #[tokio::test]
    #[ignore]
    async fn test_archive_events_writes_only_closed() {
        // ---
        use crate::models::{CloseReason, Reason, Severity};
        use chrono::{TimeZone, Utc};

        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL for ignored test");
        let pool = PgPool::connect(&url).await.unwrap();
        crate::schema::create_schema(&pool).await.unwrap();

        let entered = Utc.with_ymd_and_hms(2026, 2, 4, 15, 0, 0).unwrap();
        let open = ViolationEvent {
            id: Uuid::new_v4(),
            patient_id: "P007".to_string(),
            zone_id: None,
            reason: Reason::NoZone,
            severity: Severity::Medium,
            entered_at: entered,
            exited_at: None,
            closed_by: None,
        };
        let mut flushed = open.clone();
        flushed.id = Uuid::new_v4();
        flushed.exited_at = Some(entered);
        flushed.closed_by = Some(CloseReason::MonitoringStopped);

        let events = [open, flushed.clone()];
        assert_eq!(archive_events(&pool, &events).await, 1);

        let stored: (String,) =
            sqlx::query_as("SELECT closed_by FROM violation_events WHERE id = $1")
                .bind(flushed.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored.0, "monitoring-stopped");

        // Appending twice is harmless
        assert_eq!(archive_events(&pool, &[flushed]).await, 1);
    }

    #[test]
    fn test_row_to_zone() {
        // ---
        let row = create_test_row();
        let id = row.id;
        let zone = Zone::try_from(row).unwrap();

        assert_eq!(zone.id, id);
        assert_eq!(zone.kind, ZoneKind::Allowed);
        assert_eq!(
            window_columns(&zone.active_hours),
            (NaiveTime::from_hms_opt(8, 0, 0), NaiveTime::from_hms_opt(20, 0, 0))
        );
    }

    #[test]
    fn test_row_without_window_is_always_active() {
        // ---
        let mut row = create_test_row();
        row.window_start = None;
        row.window_end = None;
        assert_eq!(Zone::try_from(row).unwrap().active_hours, ActiveHours::Always);
    }

    #[test]
    fn test_bad_rows_are_rejected() {
        // ---
        let mut half_window = create_test_row();
        half_window.window_end = None;
        assert!(Zone::try_from(half_window).is_err());

        let mut unknown_kind = create_test_row();
        unknown_kind.kind = "forbidden".to_string();
        assert!(Zone::try_from(unknown_kind).is_err());
    }
}
