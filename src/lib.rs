//! Geofence monitoring for patient safety zones.
//!
//! Position reports flow through four stages:
//!
//! 1. **Position ingest** ([`ingest`]) validates a report and enforces
//!    strictly increasing timestamps per patient.
//! 2. **Geofence evaluation** ([`evaluator`]) classifies the position
//!    against the patient's zones from the [`registry`].
//! 3. **Violation tracking** ([`tracker`]) opens and closes violation
//!    events, including signal-lost closure after a grace period.
//! 4. Transitions are published to subscribers of the [`Monitor`].
//!
//! Each patient is served by its own worker task; see [`monitor`].
//! The binary adds an HTTP surface ([`routes`]), a polling transport
//! ([`transport`]) and optional PostgreSQL persistence ([`store`]).

pub mod clock;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod geo;
pub mod ingest;
pub mod models;
pub mod monitor;
pub mod registry;
pub mod routes;
pub mod schema;
pub mod store;
pub mod tracker;
pub mod transport;

mod worker;

// Re-exported so routes/*.rs and integration tests import from the crate
// root rather than reaching into individual modules.
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{MonitorError, MonitorResult};
pub use models::{
    ActiveHours, CloseReason, Coordinates, EvaluationResult, Ingested, NewZone, PatientId,
    PatientStatus, PositionReport, Reason, Severity, SignalStrength, TimeRange, ViolationCount,
    ViolationEvent, Zone, ZoneId, ZoneKind, ZonePatch,
};
pub use monitor::{Monitor, MonitorSettings};
