//! Error taxonomy for the geofence monitoring core.
//!
//! Every failure is either rejected at the boundary (nothing is applied)
//! or recorded as a domain event by the tracker. Nothing here is fatal.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{PatientId, ZoneId};

// ---

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid coordinates: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Stale report for patient {patient_id}: {timestamp} is not after {latest}")]
    StaleReport {
        patient_id: PatientId,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("Zone not found: {0}")]
    ZoneNotFound(ZoneId),

    #[error("Monitor is shutting down")]
    Unavailable,
}

impl MonitorError {
    /// Shorthand for building a [`MonitorError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        MonitorError::Validation(msg.into())
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
