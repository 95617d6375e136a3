//! Database schema management for `safezone-monitor`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` when persistence is enabled.
//! Only zones and closed violation events are durable; positions live in
//! the in-memory ring buffers alone.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `zones` table for geofence definitions and the
/// `violation_events` table for the closed-event log. Safe to call on every
/// startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Zone registry snapshot, reloaded at startup
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS zones (
            id             UUID PRIMARY KEY,
            patient_id     TEXT             NOT NULL,
            name           TEXT             NOT NULL,
            kind           TEXT             NOT NULL,
            center_lat     DOUBLE PRECISION NOT NULL,
            center_lng     DOUBLE PRECISION NOT NULL,
            radius_meters  DOUBLE PRECISION NOT NULL CHECK (radius_meters > 0),
            window_start   TIME,
            window_end     TIME,
            created_at     TIMESTAMPTZ      NOT NULL DEFAULT now(),
            updated_at     TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only log of closed violations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS violation_events (
            id          UUID PRIMARY KEY,
            patient_id  TEXT        NOT NULL,
            zone_id     UUID,
            reason      TEXT        NOT NULL,
            severity    TEXT        NOT NULL,
            entered_at  TIMESTAMPTZ NOT NULL,
            exited_at   TIMESTAMPTZ NOT NULL,
            closed_by   TEXT        NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_zones_patient_id
            ON zones (patient_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_violation_events_patient_entered
            ON violation_events (patient_id, entered_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
