//! Geofence Evaluator: classifies one position against a patient's zones.
//!
//! Containment is great-circle distance to the zone center at most the
//! radius. Only zones whose active window is open at the report's local
//! time-of-day take part. Among those, `restricted` beats `allowed` beats
//! `home`, and equal kinds resolve to the smallest radius (first inserted
//! on an exact tie). When no active zone contains the point the result is
//! non-compliant:
//!
//! - `outside-active-hours` if a zone contains it but its window is closed,
//! - `outside-allowed` if an allowed zone is in force elsewhere,
//! - `no-zone` otherwise.

use std::cmp::Ordering;

use chrono::{FixedOffset, Offset, Utc};

use crate::geo;
use crate::models::{EvaluationResult, PositionReport, Reason, Zone, ZoneKind};

// ---

#[derive(Debug, Clone, Copy)]
pub struct GeofenceEvaluator {
    local_offset: FixedOffset,
}

impl Default for GeofenceEvaluator {
    /// Active windows interpreted in UTC.
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl GeofenceEvaluator {
    /// `local_offset` converts report timestamps to the local clock that
    /// active windows are written in.
    pub fn new(local_offset: FixedOffset) -> Self {
        Self { local_offset }
    }

    pub fn evaluate(&self, report: &PositionReport, zones: &[Zone]) -> EvaluationResult {
        // ---
        let position = report.position();
        let local_time = report.timestamp.with_timezone(&self.local_offset).time();

        let mut best: Option<&Zone> = None;
        let mut contained_but_inactive = false;
        let mut allowed_in_force = false;

        for zone in zones {
            let active = zone.active_hours.is_active_at(local_time);
            if active && zone.kind == ZoneKind::Allowed {
                allowed_in_force = true;
            }

            if geo::haversine_meters(&position, &zone.center) > zone.radius_meters {
                continue;
            }
            if !active {
                contained_but_inactive = true;
                continue;
            }

            best = match best {
                Some(current) if rank(zone, current) != Ordering::Less => Some(current),
                _ => Some(zone),
            };
        }

        let (zone_id, compliant, reason) = match best {
            Some(zone) => match zone.kind {
                ZoneKind::Restricted => (Some(zone.id), false, Reason::InsideRestricted),
                ZoneKind::Allowed => (Some(zone.id), true, Reason::Allowed),
                ZoneKind::Home => (Some(zone.id), true, Reason::Home),
            },
            None if contained_but_inactive => (None, false, Reason::OutsideActiveHours),
            None if allowed_in_force => (None, false, Reason::OutsideAllowed),
            None => (None, false, Reason::NoZone),
        };

        EvaluationResult {
            patient_id: report.patient_id.clone(),
            timestamp: report.timestamp,
            zone_id,
            compliant,
            reason,
        }
    }
}

/// `Less` means `a` should be preferred over `b`.
fn rank(a: &Zone, b: &Zone) -> Ordering {
    b.kind
        .precedence()
        .cmp(&a.kind.precedence())
        .then_with(|| {
            a.radius_meters
                .partial_cmp(&b.radius_meters)
                .unwrap_or(Ordering::Equal)
        })
}
