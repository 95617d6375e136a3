//! Position Ingest for a single patient.
//!
//! Accepted reports are strictly increasing in time. The last `capacity`
//! reports are kept for recent-history queries and nothing else; this is
//! not a store.
//!
//! A violation closed by the clock (grace sweep, monitoring stop) also
//! raises a floor: reports stamped before that closure arrive too late to
//! reopen the interval it settled.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::error::{MonitorError, MonitorResult};
use crate::models::{PatientId, PositionReport};

// ---

#[derive(Debug)]
pub struct PositionLog {
    // ---
    patient_id: PatientId,
    capacity: usize,
    reports: VecDeque<PositionReport>,
    latest: Option<DateTime<Utc>>,
    floor: Option<DateTime<Utc>>,
}

impl PositionLog {
    pub fn new(patient_id: impl Into<PatientId>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            patient_id: patient_id.into(),
            capacity,
            reports: VecDeque::with_capacity(capacity),
            latest: None,
            floor: None,
        }
    }

    /// Validate and append `report`, evicting the oldest one when full.
    ///
    /// Rejects reports for another patient, out-of-range coordinates, any
    /// timestamp not strictly after the latest accepted one, and any
    /// timestamp before the floor.
    pub fn accept(&mut self, report: PositionReport) -> MonitorResult<()> {
        // ---
        if report.patient_id != self.patient_id {
            return Err(MonitorError::validation(format!(
                "report for {} routed to {}",
                report.patient_id, self.patient_id
            )));
        }
        report.validate()?;

        if let Some(latest) = self.latest {
            if report.timestamp <= latest {
                return Err(MonitorError::StaleReport {
                    patient_id: self.patient_id.clone(),
                    timestamp: report.timestamp,
                    latest,
                });
            }
        }

        if let Some(floor) = self.floor {
            if report.timestamp < floor {
                return Err(MonitorError::StaleReport {
                    patient_id: self.patient_id.clone(),
                    timestamp: report.timestamp,
                    latest: floor,
                });
            }
        }

        self.latest = Some(report.timestamp);
        if self.reports.len() == self.capacity {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
        Ok(())
    }

    /// Refuse reports stamped before `at` from now on. Never lowers.
    pub fn raise_floor(&mut self, at: DateTime<Utc>) {
        self.floor = Some(self.floor.map_or(at, |floor| floor.max(at)));
    }

    /// Timestamp of the most recently accepted report. Survives eviction.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.latest
    }

    pub fn last(&self) -> Option<&PositionReport> {
        self.reports.back()
    }

    /// Up to `limit` reports, newest first.
    pub fn recent(&self, limit: usize) -> Vec<PositionReport> {
        self.reports.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SignalStrength;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 4, 15, 0, 0).unwrap()
    }

    fn report_at(minutes: i64) -> PositionReport {
        PositionReport {
            patient_id: "P001".to_string(),
            latitude: 48.8566,
            longitude: 2.3522,
            timestamp: base_time() + Duration::minutes(minutes),
            speed: 0.0,
            battery_level: 85,
            signal_strength: SignalStrength::Excellent,
        }
    }

    #[test]
    fn test_accepts_increasing_timestamps() {
        // ---
        let mut log = PositionLog::new("P001", 10);
        tokio_test::assert_ok!(log.accept(report_at(0)));
        tokio_test::assert_ok!(log.accept(report_at(1)));
        assert_eq!(log.len(), 2);
        assert_eq!(log.latest_timestamp(), Some(base_time() + Duration::minutes(1)));
    }

    #[test]
    fn test_rejects_stale_and_duplicate() {
        // ---
        let mut log = PositionLog::new("P001", 10);
        log.accept(report_at(5)).unwrap();

        let dup = log.accept(report_at(5)).unwrap_err();
        assert!(matches!(dup, MonitorError::StaleReport { .. }));

        let older = log.accept(report_at(4)).unwrap_err();
        match older {
            MonitorError::StaleReport { latest, .. } => {
                assert_eq!(latest, base_time() + Duration::minutes(5))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Rejections leave state untouched
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_floor_rejects_reports_before_it() {
        // ---
        let mut log = PositionLog::new("P001", 10);
        log.accept(report_at(0)).unwrap();
        log.raise_floor(base_time() + Duration::minutes(10));
        log.raise_floor(base_time() + Duration::minutes(3));

        let late = log.accept(report_at(9)).unwrap_err();
        assert!(matches!(late, MonitorError::StaleReport { .. }));

        // The floor itself is still a valid timestamp
        tokio_test::assert_ok!(log.accept(report_at(10)));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_rejects_invalid_coordinates() {
        // ---
        let mut log = PositionLog::new("P001", 10);
        let mut bad = report_at(0);
        bad.longitude = 200.0;

        tokio_test::assert_err!(log.accept(bad));
        assert!(log.is_empty());
        assert!(log.latest_timestamp().is_none());
    }

    #[test]
    fn test_rejects_other_patient() {
        // ---
        let mut log = PositionLog::new("P001", 10);
        let mut other = report_at(0);
        other.patient_id = "P003".to_string();
        assert!(matches!(
            log.accept(other),
            Err(MonitorError::Validation(_))
        ));
    }

    #[test]
    fn test_ring_evicts_oldest() {
        // ---
        let mut log = PositionLog::new("P001", 3);
        for m in 0..5 {
            log.accept(report_at(m)).unwrap();
        }

        assert_eq!(log.len(), 3);
        let recent = log.recent(10);
        let minutes: Vec<_> = recent
            .iter()
            .map(|r| (r.timestamp - base_time()).num_minutes())
            .collect();
        assert_eq!(minutes, vec![4, 3, 2]);

        // Eviction does not relax the monotonic check
        assert!(log.accept(report_at(1)).is_err());
        assert_eq!(log.recent(1)[0].timestamp, log.last().unwrap().timestamp);
    }
}
