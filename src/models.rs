//! Data models for the geofence monitoring service.
//!
//! Zones and position reports arrive from collaborators (the zone
//! management UI and the position transport); evaluation results and
//! violation events are derived here and handed back out read-only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};
use crate::geo;

// ---

pub type PatientId = String;
pub type ZoneId = Uuid;

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    // ---
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        geo::coordinates_in_range(self.latitude, self.longitude)
    }
}

/// What a zone means for the patient being inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Home,
    Allowed,
    Restricted,
}

impl ZoneKind {
    /// Higher wins when several active zones contain the same point.
    pub fn precedence(self) -> u8 {
        match self {
            ZoneKind::Home => 0,
            ZoneKind::Allowed => 1,
            ZoneKind::Restricted => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Home => "home",
            ZoneKind::Allowed => "allowed",
            ZoneKind::Restricted => "restricted",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home" => Ok(ZoneKind::Home),
            "allowed" => Ok(ZoneKind::Allowed),
            "restricted" => Ok(ZoneKind::Restricted),
            other => Err(MonitorError::validation(format!("unknown zone type '{other}'"))),
        }
    }
}

/// Time-of-day window during which a zone's rules are enforced.
///
/// A window whose end is earlier than its start wraps past midnight
/// (22:00 to 06:00 covers the night). `00:00` to `00:00` is the same as
/// [`ActiveHours::Always`]; any other window with equal ends is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ActiveHours {
    #[default]
    Always,
    Window {
        start: NaiveTime,
        end: NaiveTime,
    },
}

impl ActiveHours {
    /// Is the window open at local time-of-day `t`? Start inclusive, end exclusive.
    pub fn is_active_at(&self, t: NaiveTime) -> bool {
        // ---
        match *self {
            ActiveHours::Always => true,
            ActiveHours::Window { start, end } if start < end => start <= t && t < end,
            ActiveHours::Window { start, end } if start > end => t >= start || t < end,
            ActiveHours::Window { .. } => true,
        }
    }

    pub fn validate(&self) -> MonitorResult<()> {
        // ---
        match *self {
            ActiveHours::Window { start, end } if start == end && start != NaiveTime::MIN => {
                Err(MonitorError::validation(format!(
                    "active window start and end are both {start}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Collapse the `00:00`-`00:00` full-day window into `Always`.
    pub fn normalized(self) -> Self {
        match self {
            ActiveHours::Window { start, end } if start == end => ActiveHours::Always,
            other => other,
        }
    }
}

/// A circular geofence owned by the zone registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    // ---
    pub id: ZoneId,
    pub patient_id: PatientId,
    pub name: String,
    pub kind: ZoneKind,
    pub center: Coordinates,
    pub radius_meters: f64,
    #[serde(default)]
    pub active_hours: ActiveHours,
}

impl Zone {
    pub fn validate(&self) -> MonitorResult<()> {
        // ---
        if self.patient_id.trim().is_empty() {
            return Err(MonitorError::validation("zone patient_id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(MonitorError::validation("zone name must not be empty"));
        }
        if !self.center.is_valid() {
            return Err(MonitorError::validation(format!(
                "zone center ({}, {}) is out of range",
                self.center.latitude, self.center.longitude
            )));
        }
        if !(self.radius_meters.is_finite() && self.radius_meters > 0.0) {
            return Err(MonitorError::validation(format!(
                "zone radius must be positive, got {}",
                self.radius_meters
            )));
        }
        self.active_hours.validate()
    }
}

/// Zone creation payload from the zone management UI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewZone {
    // ---
    pub patient_id: PatientId,
    pub name: String,
    pub kind: ZoneKind,
    pub center: Coordinates,
    pub radius_meters: f64,
    #[serde(default)]
    pub active_hours: ActiveHours,
}

impl NewZone {
    pub fn into_zone(self, id: ZoneId) -> Zone {
        Zone {
            id,
            patient_id: self.patient_id,
            name: self.name,
            kind: self.kind,
            center: self.center,
            radius_meters: self.radius_meters,
            active_hours: self.active_hours.normalized(),
        }
    }
}

/// Partial zone update. The owning patient cannot be changed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ZonePatch {
    // ---
    pub name: Option<String>,
    pub kind: Option<ZoneKind>,
    pub center: Option<Coordinates>,
    pub radius_meters: Option<f64>,
    pub active_hours: Option<ActiveHours>,
}

impl ZonePatch {
    /// Produce the patched zone without touching `zone`.
    pub fn applied_to(&self, zone: &Zone) -> Zone {
        // ---
        let mut patched = zone.clone();
        if let Some(name) = &self.name {
            patched.name = name.clone();
        }
        if let Some(kind) = self.kind {
            patched.kind = kind;
        }
        if let Some(center) = self.center {
            patched.center = center;
        }
        if let Some(radius) = self.radius_meters {
            patched.radius_meters = radius;
        }
        if let Some(hours) = self.active_hours {
            patched.active_hours = hours.normalized();
        }
        patched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Timestamped patient location from the position transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    // ---
    pub patient_id: PatientId,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// km/h
    pub speed: f64,
    /// Percent, 0-100.
    pub battery_level: u8,
    pub signal_strength: SignalStrength,
}

impl PositionReport {
    pub fn position(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn is_moving(&self) -> bool {
        self.speed > 0.0
    }

    /// Field checks that need no per-patient state.
    pub fn validate(&self) -> MonitorResult<()> {
        // ---
        if self.patient_id.trim().is_empty() {
            return Err(MonitorError::validation("report patient_id must not be empty"));
        }
        if !geo::coordinates_in_range(self.latitude, self.longitude) {
            return Err(MonitorError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        if !(self.speed.is_finite() && self.speed >= 0.0) {
            return Err(MonitorError::validation(format!(
                "speed must be a non-negative number, got {}",
                self.speed
            )));
        }
        if self.battery_level > 100 {
            return Err(MonitorError::validation(format!(
                "battery level {} exceeds 100",
                self.battery_level
            )));
        }
        Ok(())
    }
}

/// Why a position was classified the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    /// Compliant: inside an active home zone.
    Home,
    /// Compliant: inside an active allowed zone.
    Allowed,
    InsideRestricted,
    /// Outside every zone while an allowed perimeter is in force.
    OutsideAllowed,
    /// Only zones whose window is currently closed contain the point.
    OutsideActiveHours,
    NoZone,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Home => "home",
            Reason::Allowed => "allowed",
            Reason::InsideRestricted => "inside-restricted",
            Reason::OutsideAllowed => "outside-allowed",
            Reason::OutsideActiveHours => "outside-active-hours",
            Reason::NoZone => "no-zone",
        }
    }
}

/// Outcome of evaluating one position against a patient's zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    // ---
    pub patient_id: PatientId,
    pub timestamp: DateTime<Utc>,
    pub zone_id: Option<ZoneId>,
    pub compliant: bool,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn for_reason(reason: Reason) -> Self {
        match reason {
            Reason::InsideRestricted => Severity::High,
            Reason::OutsideAllowed | Reason::NoZone => Severity::Medium,
            Reason::OutsideActiveHours | Reason::Home | Reason::Allowed => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// How a violation event came to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// Position returned to compliance.
    Resolved,
    /// A different violation took over (e.g. left a restricted zone into no coverage).
    ZoneChanged,
    SignalLost,
    MonitoringStopped,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Resolved => "resolved",
            CloseReason::ZoneChanged => "zone-changed",
            CloseReason::SignalLost => "signal-lost",
            CloseReason::MonitoringStopped => "monitoring-stopped",
        }
    }
}

/// Interval during which a patient was non-compliant relative to a zone
/// (or to no zone at all when `zone_id` is `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    // ---
    pub id: Uuid,
    pub patient_id: PatientId,
    pub zone_id: Option<ZoneId>,
    pub reason: Reason,
    pub severity: Severity,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub closed_by: Option<CloseReason>,
}

impl ViolationEvent {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }

    /// Does the event interval intersect `range`? Open events extend to infinity.
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        // ---
        let starts_before_end = range.end.map_or(true, |end| self.entered_at < end);
        let ends_after_start = match (range.start, self.exited_at) {
            (Some(start), Some(exited)) => exited >= start,
            _ => true,
        };
        starts_before_end && ends_after_start
    }
}

/// Half-open `[start, end)` filter; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Parse `"start,end"` in RFC 3339, e.g.
    /// `"2026-02-04T00:00:00Z,2026-02-05T00:00:00Z"`. Either side may be blank.
    pub fn parse(s: &str) -> MonitorResult<Self> {
        // ---
        let (start, end) = s.split_once(',').ok_or_else(|| {
            MonitorError::validation(format!("time range '{s}' must be 'start,end'"))
        })?;

        let parse_side = |side: &str| -> MonitorResult<Option<DateTime<Utc>>> {
            let side = side.trim();
            if side.is_empty() {
                return Ok(None);
            }
            DateTime::parse_from_rfc3339(side)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| MonitorError::validation(format!("bad timestamp '{side}': {e}")))
        };

        let range = TimeRange {
            start: parse_side(start)?,
            end: parse_side(end)?,
        };
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if end < start {
                return Err(MonitorError::validation(format!(
                    "time range end {end} precedes start {start}"
                )));
            }
        }
        Ok(range)
    }
}

/// Number of events (open and closed) per zone in the current reporting period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCount {
    pub zone_id: Option<ZoneId>,
    pub count: u64,
}

/// Result of an accepted report: its classification plus any violation
/// transitions it caused, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingested {
    pub evaluation: EvaluationResult,
    pub events: Vec<ViolationEvent>,
}

/// Live view of a patient, as shown on the tracking screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientStatus {
    // ---
    pub patient_id: PatientId,
    pub monitoring: bool,
    pub last_position: Option<PositionReport>,
    pub is_moving: bool,
    pub last_evaluation: Option<EvaluationResult>,
    pub open_violation: Option<ViolationEvent>,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn create_test_zone() -> Zone {
        // ---
        NewZone {
            patient_id: "P001".to_string(),
            name: "Domicile - Appartement".to_string(),
            kind: ZoneKind::Home,
            center: Coordinates::new(48.8566, 2.3522),
            radius_meters: 100.0,
            active_hours: ActiveHours::Always,
        }
        .into_zone(Uuid::new_v4())
    }

    fn create_test_report() -> PositionReport {
        PositionReport {
            patient_id: "P003".to_string(),
            latitude: 48.8606,
            longitude: 2.3376,
            timestamp: Utc.with_ymd_and_hms(2026, 2, 4, 15, 30, 0).unwrap(),
            speed: 3.5,
            battery_level: 62,
            signal_strength: SignalStrength::Good,
        }
    }

    #[test]
    fn test_daytime_window() {
        // ---
        let hours = ActiveHours::Window {
            start: hm(8, 0),
            end: hm(20, 0),
        };
        assert!(hours.is_active_at(hm(8, 0)));
        assert!(hours.is_active_at(hm(19, 59)));
        assert!(!hours.is_active_at(hm(20, 0)));
        assert!(!hours.is_active_at(hm(22, 0)));
        assert!(!hours.is_active_at(hm(7, 59)));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        // ---
        let night = ActiveHours::Window {
            start: hm(22, 0),
            end: hm(6, 0),
        };
        assert!(night.is_active_at(hm(22, 0)));
        assert!(night.is_active_at(hm(23, 59)));
        assert!(night.is_active_at(hm(0, 0)));
        assert!(night.is_active_at(hm(5, 59)));
        assert!(!night.is_active_at(hm(6, 0)));
        assert!(!night.is_active_at(hm(12, 0)));
    }

    #[test]
    fn test_window_equal_ends() {
        // ---
        let full_day = ActiveHours::Window {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        };
        assert!(full_day.validate().is_ok());
        assert_eq!(full_day.normalized(), ActiveHours::Always);

        let degenerate = ActiveHours::Window {
            start: hm(9, 0),
            end: hm(9, 0),
        };
        assert!(matches!(
            degenerate.validate(),
            Err(MonitorError::Validation(_))
        ));
    }

    #[test]
    fn test_zone_validation() {
        // ---
        assert!(create_test_zone().validate().is_ok());

        let mut zero_radius = create_test_zone();
        zero_radius.radius_meters = 0.0;
        assert!(matches!(
            zero_radius.validate(),
            Err(MonitorError::Validation(_))
        ));

        let mut bad_lat = create_test_zone();
        bad_lat.center.latitude = 91.0;
        assert!(bad_lat.validate().is_err());

        let mut bad_lng = create_test_zone();
        bad_lng.center.longitude = -181.0;
        assert!(bad_lng.validate().is_err());

        let mut unnamed = create_test_zone();
        unnamed.name = "   ".to_string();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_patch_leaves_original_untouched() {
        // ---
        let zone = create_test_zone();
        let patch = ZonePatch {
            radius_meters: Some(250.0),
            kind: Some(ZoneKind::Allowed),
            ..Default::default()
        };

        let patched = patch.applied_to(&zone);
        assert_eq!(patched.radius_meters, 250.0);
        assert_eq!(patched.kind, ZoneKind::Allowed);
        assert_eq!(patched.id, zone.id);
        assert_eq!(patched.name, zone.name);
        assert_eq!(zone.radius_meters, 100.0);
    }

    #[test]
    fn test_report_validation() {
        // ---
        assert!(create_test_report().validate().is_ok());

        let mut off_map = create_test_report();
        off_map.latitude = -95.0;
        assert!(matches!(
            off_map.validate(),
            Err(MonitorError::InvalidCoordinates { .. })
        ));

        let mut negative_speed = create_test_report();
        negative_speed.speed = -1.0;
        assert!(matches!(
            negative_speed.validate(),
            Err(MonitorError::Validation(_))
        ));

        let mut overcharged = create_test_report();
        overcharged.battery_level = 101;
        assert!(overcharged.validate().is_err());
    }

    #[test]
    fn test_report_wire_format() {
        // ---
        let json = r#"{
            "patient_id": "P007",
            "latitude": 48.8738,
            "longitude": 2.2950,
            "timestamp": "2026-02-04T15:28:00Z",
            "speed": 0.0,
            "battery_level": 45,
            "signal_strength": "fair"
        }"#;
        let report: PositionReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.patient_id, "P007");
        assert_eq!(report.signal_strength, SignalStrength::Fair);
        assert!(!report.is_moving());
    }

    #[test]
    fn test_reason_labels_match_serde() {
        // ---
        for reason in [
            Reason::Home,
            Reason::Allowed,
            Reason::InsideRestricted,
            Reason::OutsideAllowed,
            Reason::OutsideActiveHours,
            Reason::NoZone,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_active_hours_json() {
        // ---
        let hours: ActiveHours =
            serde_json::from_str(r#"{"mode":"window","start":"08:00:00","end":"20:00:00"}"#)
                .unwrap();
        assert_eq!(
            hours,
            ActiveHours::Window {
                start: hm(8, 0),
                end: hm(20, 0)
            }
        );

        let always: ActiveHours = serde_json::from_str(r#"{"mode":"always"}"#).unwrap();
        assert_eq!(always, ActiveHours::Always);
    }

    #[test]
    fn test_time_range_parsing() {
        // ---
        let range = TimeRange::parse("2026-02-04T00:00:00Z,2026-02-05T00:00:00Z").unwrap();
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2026, 2, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(
            range.end,
            Some(Utc.with_ymd_and_hms(2026, 2, 5, 0, 0, 0).unwrap())
        );

        let open_ended = TimeRange::parse("2026-02-04T00:00:00+01:00,").unwrap();
        assert_eq!(
            open_ended.start,
            Some(Utc.with_ymd_and_hms(2026, 2, 3, 23, 0, 0).unwrap())
        );
        assert!(open_ended.end.is_none());

        assert!(TimeRange::parse("2026-02-04T00:00:00Z").is_err());
        assert!(TimeRange::parse("yesterday,today").is_err());
        assert!(TimeRange::parse("2026-02-05T00:00:00Z,2026-02-04T00:00:00Z").is_err());
    }

    #[test]
    fn test_event_overlap() {
        // ---
        let t = |h| Utc.with_ymd_and_hms(2026, 2, 4, h, 0, 0).unwrap();
        let mut event = ViolationEvent {
            id: Uuid::new_v4(),
            patient_id: "P007".to_string(),
            zone_id: None,
            reason: Reason::NoZone,
            severity: Severity::Medium,
            entered_at: t(10),
            exited_at: Some(t(12)),
            closed_by: Some(CloseReason::Resolved),
        };

        let window = |a, b| TimeRange {
            start: Some(t(a)),
            end: Some(t(b)),
        };
        assert!(event.overlaps(&window(11, 13)));
        assert!(event.overlaps(&window(12, 13)));
        assert!(!event.overlaps(&window(13, 14)));
        assert!(!event.overlaps(&window(8, 10)));
        assert!(event.overlaps(&TimeRange::default()));

        event.exited_at = None;
        assert!(event.overlaps(&window(20, 21)));
    }
}
