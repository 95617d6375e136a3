//! Violation Tracker: turns evaluation results into violation events.
//!
//! Per patient the tracker is a two-state machine keyed by zone:
//!
//! | current            | evaluation             | effect                             |
//! |--------------------|------------------------|------------------------------------|
//! | compliant          | compliant              | nothing                            |
//! | compliant          | violating zone Z       | open event for Z                   |
//! | violating zone Z   | violating zone Z       | nothing (event stays open)         |
//! | violating zone Z   | Z, more severe reason  | close Z (`zone-changed`), reopen Z |
//! | violating zone Z   | violating zone Y       | close Z (`zone-changed`), open Y   |
//! | violating zone Z   | compliant              | close Z (`resolved`)               |
//!
//! A "zone" of `None` stands for violations with no containing zone
//! (`no-zone`, `outside-allowed`, `outside-active-hours`). Those share a
//! key but not a severity, so an escalation reopens the event at the new
//! severity. The evaluator picks a single zone per position, so at most
//! one event is open.
//!
//! Silence longer than the grace period closes the open event at
//! `last_seen + grace` with `signal-lost`. The same rule is applied by the
//! background sweep (against the clock) and by the next report (against
//! its timestamp), so both paths close the event identically.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    CloseReason, EvaluationResult, PatientId, Severity, TimeRange, ViolationCount, ViolationEvent,
    ZoneId,
};

// ---

#[derive(Debug)]
pub struct ViolationTracker {
    // ---
    patient_id: PatientId,
    grace_period: Duration,
    log_capacity: usize,
    open: Option<ViolationEvent>,
    closed: VecDeque<ViolationEvent>,
    counts: BTreeMap<Option<ZoneId>, u64>,
    last_seen: Option<DateTime<Utc>>,
}

impl ViolationTracker {
    pub fn new(
        patient_id: impl Into<PatientId>,
        grace_period: Duration,
        log_capacity: usize,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            grace_period,
            log_capacity: log_capacity.max(1),
            open: None,
            closed: VecDeque::new(),
            counts: BTreeMap::new(),
            last_seen: None,
        }
    }

    /// Apply one evaluation. Returns the events that changed, in order:
    /// a closed event, an opened one, or both when the violation moves
    /// from one zone to another.
    pub fn record(&mut self, result: &EvaluationResult) -> Vec<ViolationEvent> {
        // ---
        let at = result.timestamp;
        self.last_seen = Some(self.last_seen.map_or(at, |seen| seen.max(at)));

        let mut changed = Vec::new();
        match self.open.take() {
            Some(event) if result.compliant => {
                changed.push(self.close(event, at, CloseReason::Resolved));
            }
            Some(event)
                if event.zone_id == result.zone_id
                    && Severity::for_reason(result.reason) <= event.severity =>
            {
                self.open = Some(event);
            }
            Some(event) => {
                changed.push(self.close(event, at, CloseReason::ZoneChanged));
                changed.push(self.open_event(result));
            }
            None if !result.compliant => {
                changed.push(self.open_event(result));
            }
            None => {}
        }
        changed
    }

    /// Close the open event if nothing has been seen for the grace period
    /// as of `now`. The closure time is `last_seen + grace`, never `now`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<ViolationEvent> {
        // ---
        let last_seen = self.last_seen?;
        if self.open.is_none() || now - last_seen < self.grace_period {
            return None;
        }
        let event = self.open.take()?;
        Some(self.close(event, last_seen + self.grace_period, CloseReason::SignalLost))
    }

    /// Flush the open event because monitoring is being stopped.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<ViolationEvent> {
        // ---
        let event = self.open.take()?;
        let at = now.max(event.entered_at);
        Some(self.close(event, at, CloseReason::MonitoringStopped))
    }

    pub fn open_event_ref(&self) -> Option<&ViolationEvent> {
        self.open.as_ref()
    }

    /// Closed and open events overlapping `range`, oldest first.
    pub fn history(&self, range: &TimeRange) -> Vec<ViolationEvent> {
        self.closed
            .iter()
            .chain(self.open.iter())
            .filter(|e| e.overlaps(range))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> Vec<ViolationCount> {
        self.counts
            .iter()
            .map(|(zone_id, count)| ViolationCount {
                zone_id: *zone_id,
                count: *count,
            })
            .collect()
    }

    /// Start a new reporting period. An event still open is counted again.
    pub fn reset_counts(&mut self) {
        self.counts.clear();
        if let Some(open) = &self.open {
            self.counts.insert(open.zone_id, 1);
        }
    }

    fn open_event(&mut self, result: &EvaluationResult) -> ViolationEvent {
        // ---
        let event = ViolationEvent {
            id: Uuid::new_v4(),
            patient_id: self.patient_id.clone(),
            zone_id: result.zone_id,
            reason: result.reason,
            severity: Severity::for_reason(result.reason),
            entered_at: result.timestamp,
            exited_at: None,
            closed_by: None,
        };
        *self.counts.entry(event.zone_id).or_insert(0) += 1;

        warn!(
            patient_id = %self.patient_id,
            event_id = %event.id,
            zone_id = ?event.zone_id,
            severity = event.severity.as_str(),
            "Violation opened: {}",
            event.reason.as_str()
        );
        self.open = Some(event.clone());
        event
    }

    fn close(
        &mut self,
        mut event: ViolationEvent,
        at: DateTime<Utc>,
        why: CloseReason,
    ) -> ViolationEvent {
        // ---
        event.exited_at = Some(at);
        event.closed_by = Some(why);

        info!(
            patient_id = %self.patient_id,
            event_id = %event.id,
            zone_id = ?event.zone_id,
            duration_s = (at - event.entered_at).num_seconds(),
            "Violation closed: {}",
            why.as_str()
        );

        if self.closed.len() == self.log_capacity {
            self.closed.pop_front();
        }
        self.closed.push_back(event.clone());
        event
    }
}
