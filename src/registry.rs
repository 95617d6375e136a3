//! Zone Registry: the only owner of geofence definitions.
//!
//! Zones are partitioned by patient so that evaluating one patient never
//! touches another patient's zones. Within a patient, zones keep their
//! insertion order; that order only matters for deterministic tie-breaks.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};
use crate::models::{NewZone, PatientId, Zone, ZoneId, ZonePatch};

// ---

#[derive(Debug, Default)]
pub struct ZoneRegistry {
    // ---
    by_patient: HashMap<PatientId, Vec<Zone>>,
    owner: HashMap<ZoneId, PatientId>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a new zone, returning its generated id.
    pub fn add_zone(&mut self, new_zone: NewZone) -> MonitorResult<ZoneId> {
        // ---
        let zone = new_zone.into_zone(Uuid::new_v4());
        zone.validate()?;

        let id = zone.id;
        info!(
            zone_id = %id,
            patient_id = %zone.patient_id,
            kind = %zone.kind,
            radius_m = zone.radius_meters,
            "Zone added: {}",
            zone.name
        );
        self.insert(zone);
        Ok(id)
    }

    /// Re-insert a zone that already has an id (e.g. loaded from storage).
    pub fn restore(&mut self, zone: Zone) -> MonitorResult<()> {
        // ---
        zone.validate()?;
        if self.owner.contains_key(&zone.id) {
            return Err(MonitorError::validation(format!(
                "zone {} is already registered",
                zone.id
            )));
        }
        debug!(zone_id = %zone.id, patient_id = %zone.patient_id, "Zone restored");
        self.insert(zone);
        Ok(())
    }

    pub fn remove_zone(&mut self, id: ZoneId) -> MonitorResult<Zone> {
        // ---
        let patient_id = self.owner.remove(&id).ok_or(MonitorError::ZoneNotFound(id))?;
        let zones = self
            .by_patient
            .get_mut(&patient_id)
            .ok_or(MonitorError::ZoneNotFound(id))?;
        let pos = zones
            .iter()
            .position(|z| z.id == id)
            .ok_or(MonitorError::ZoneNotFound(id))?;
        let removed = zones.remove(pos);

        if zones.is_empty() {
            self.by_patient.remove(&patient_id);
        }

        info!(zone_id = %id, patient_id = %patient_id, "Zone removed: {}", removed.name);
        Ok(removed)
    }

    /// Apply `patch` atomically: the stored zone only changes if the
    /// patched result validates.
    pub fn update_zone(&mut self, id: ZoneId, patch: &ZonePatch) -> MonitorResult<Zone> {
        // ---
        let zone = self.zone_mut(id)?;
        let patched = patch.applied_to(zone);
        patched.validate()?;
        *zone = patched.clone();

        info!(zone_id = %id, patient_id = %patched.patient_id, "Zone updated");
        Ok(patched)
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        let patient_id = self.owner.get(&id)?;
        self.by_patient.get(patient_id)?.iter().find(|z| z.id == id)
    }

    /// Zones for a patient in insertion order; empty if none.
    pub fn zones_for_patient(&self, patient_id: &str) -> &[Zone] {
        self.by_patient
            .get(patient_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    fn insert(&mut self, zone: Zone) {
        self.owner.insert(zone.id, zone.patient_id.clone());
        self.by_patient
            .entry(zone.patient_id.clone())
            .or_default()
            .push(zone);
    }

    fn zone_mut(&mut self, id: ZoneId) -> MonitorResult<&mut Zone> {
        let patient_id = self.owner.get(&id).ok_or(MonitorError::ZoneNotFound(id))?;
        self.by_patient
            .get_mut(patient_id)
            .and_then(|zones| zones.iter_mut().find(|z| z.id == id))
            .ok_or(MonitorError::ZoneNotFound(id))
    }
}
