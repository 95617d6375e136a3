//! `Monitor`: the public face of the geofence monitoring core.
//!
//! Zone management goes straight to the shared [`ZoneRegistry`]. Anything
//! per patient (ingest, queries, sweep, stop) is routed to that patient's
//! worker task, which is spawned on the first accepted report. Violation
//! transitions are published on a broadcast channel for alerting and
//! archiving collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, FixedOffset, Offset, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{MonitorError, MonitorResult};
use crate::models::{
    Ingested, NewZone, PatientId, PatientStatus, PositionReport, TimeRange, ViolationCount,
    ViolationEvent, Zone, ZoneId, ZonePatch,
};
use crate::registry::ZoneRegistry;
use crate::worker::{Command, PatientWorker, WorkerHandle};

// ---

const EVENT_BUFFER: usize = 1024;

/// Tunables for the monitoring core.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    // ---
    /// Silence after which an open violation closes as `signal-lost`.
    pub grace_period: Duration,

    /// Reports kept per patient for recent-history queries.
    pub history_capacity: usize,

    /// Closed violation events kept in memory per patient.
    pub event_log_capacity: usize,

    /// Offset that turns report timestamps into the local time-of-day
    /// active windows are written in.
    pub local_offset: FixedOffset,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::minutes(10),
            history_capacity: 100,
            event_log_capacity: 1000,
            local_offset: Utc.fix(),
        }
    }
}

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    settings: MonitorSettings,
    clock: Arc<dyn Clock>,
    registry: Arc<RwLock<ZoneRegistry>>,
    workers: Mutex<HashMap<PatientId, WorkerHandle>>,
    events: broadcast::Sender<ViolationEvent>,
    shutting_down: AtomicBool,
}

impl Monitor {
    pub fn new(settings: MonitorSettings, clock: Arc<dyn Clock>) -> Self {
        // ---
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                settings,
                clock,
                registry: Arc::new(RwLock::new(ZoneRegistry::new())),
                workers: Mutex::new(HashMap::new()),
                events,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.inner.settings
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Receive every violation transition (opened and closed events).
    pub fn subscribe(&self) -> broadcast::Receiver<ViolationEvent> {
        self.inner.events.subscribe()
    }

    // --- Zone management

    pub async fn add_zone(&self, zone: NewZone) -> MonitorResult<ZoneId> {
        self.inner.registry.write().await.add_zone(zone)
    }

    /// Load previously persisted zones. Invalid ones are skipped and logged.
    pub async fn restore_zones(&self, zones: Vec<Zone>) -> usize {
        // ---
        let mut registry = self.inner.registry.write().await;
        let mut restored = 0;
        for zone in zones {
            let id = zone.id;
            match registry.restore(zone) {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!(zone_id = %id, "Skipping stored zone: {}", e),
            }
        }
        restored
    }

    pub async fn remove_zone(&self, id: ZoneId) -> MonitorResult<Zone> {
        self.inner.registry.write().await.remove_zone(id)
    }

    pub async fn update_zone(&self, id: ZoneId, patch: ZonePatch) -> MonitorResult<Zone> {
        self.inner.registry.write().await.update_zone(id, &patch)
    }

    pub async fn zone(&self, id: ZoneId) -> Option<Zone> {
        self.inner.registry.read().await.zone(id).cloned()
    }

    pub async fn zones_for_patient(&self, patient_id: &str) -> Vec<Zone> {
        self.inner
            .registry
            .read()
            .await
            .zones_for_patient(patient_id)
            .to_vec()
    }

    // --- Position ingest

    /// Validate, evaluate and track one report. At most once: a rejected
    /// report leaves no trace and is never retried here.
    pub async fn ingest(&self, report: PositionReport) -> MonitorResult<Ingested> {
        // ---
        report.validate()?;
        if self.is_shutting_down() {
            return Err(MonitorError::Unavailable);
        }

        let tx = {
            let mut workers = self.inner.workers.lock().await;
            // shutdown() sets the flag before draining under this lock
            if self.is_shutting_down() {
                return Err(MonitorError::Unavailable);
            }
            workers
                .entry(report.patient_id.clone())
                .or_insert_with(|| {
                    debug!(patient_id = %report.patient_id, "Spawning patient worker");
                    PatientWorker::spawn(
                        report.patient_id.clone(),
                        &self.inner.settings,
                        self.inner.registry.clone(),
                        self.inner.events.clone(),
                    )
                })
                .tx
                .clone()
        };

        let (reply, rx) = oneshot::channel();
        send_and_wait(&tx, Command::Ingest { report, reply }, rx).await?
    }

    // --- Per-patient queries

    pub async fn open_violations(&self, patient_id: &str) -> MonitorResult<Vec<ViolationEvent>> {
        Ok(self
            .request(patient_id, |reply| Command::OpenViolations { reply })
            .await?
            .unwrap_or_default())
    }

    pub async fn violation_history(
        &self,
        patient_id: &str,
        range: TimeRange,
    ) -> MonitorResult<Vec<ViolationEvent>> {
        Ok(self
            .request(patient_id, |reply| Command::History { range, reply })
            .await?
            .unwrap_or_default())
    }

    pub async fn violation_counts(&self, patient_id: &str) -> MonitorResult<Vec<ViolationCount>> {
        Ok(self
            .request(patient_id, |reply| Command::Counts { reply })
            .await?
            .unwrap_or_default())
    }

    /// Begin a new reporting period for the patient's violation counters.
    pub async fn reset_violation_counts(&self, patient_id: &str) -> MonitorResult<()> {
        self.request(patient_id, |reply| Command::ResetCounts { reply })
            .await
            .map(|_| ())
    }

    /// Newest-first recent reports, at most `limit`.
    pub async fn recent_positions(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> MonitorResult<Vec<PositionReport>> {
        Ok(self
            .request(patient_id, |reply| Command::RecentPositions { limit, reply })
            .await?
            .unwrap_or_default())
    }

    /// `None` when no report has ever been accepted for the patient.
    pub async fn patient_status(&self, patient_id: &str) -> MonitorResult<Option<PatientStatus>> {
        self.request(patient_id, |reply| Command::Status { reply })
            .await
    }

    // --- Time-driven transitions and lifecycle

    /// Stop monitoring a patient, closing any open violation as
    /// `monitoring-stopped`. A later accepted report resumes monitoring.
    pub async fn stop_monitoring(&self, patient_id: &str) -> MonitorResult<Option<ViolationEvent>> {
        // ---
        let now = self.inner.clock.now();
        Ok(self
            .request(patient_id, |reply| Command::Stop { now, reply })
            .await?
            .flatten())
    }

    /// Close every open violation whose patient has been silent for the
    /// grace period, as of the monitor clock.
    pub async fn sweep(&self) -> Vec<ViolationEvent> {
        // ---
        let now = self.inner.clock.now();
        let senders: Vec<_> = {
            let workers = self.inner.workers.lock().await;
            workers.values().map(|w| w.tx.clone()).collect()
        };

        let mut closed = Vec::new();
        for tx in senders {
            let (reply, rx) = oneshot::channel();
            if let Ok(Some(event)) = send_and_wait(&tx, Command::Sweep { now, reply }, rx).await {
                closed.push(event);
            }
        }
        closed
    }

    /// Periodically [`sweep`](Self::sweep) until shutdown.
    pub async fn run_sweeper(self, every: std::time::Duration) {
        // ---
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.is_shutting_down() {
                break;
            }
            let closed = self.sweep().await;
            if !closed.is_empty() {
                info!("Sweep closed {} violation(s) after signal loss", closed.len());
            }
        }
        debug!("Sweeper stopped");
    }

    /// Stop every patient, flush their open violations and wait for the
    /// workers to finish. Further ingests fail with `Unavailable`.
    pub async fn shutdown(&self) -> Vec<ViolationEvent> {
        // ---
        self.inner.shutting_down.store(true, Ordering::Release);
        let now = self.inner.clock.now();
        let workers: Vec<_> = self.inner.workers.lock().await.drain().collect();

        let mut flushed = Vec::new();
        for (patient_id, handle) in workers {
            let (reply, rx) = oneshot::channel();
            let command = Command::Shutdown { now, reply };
            if let Ok(Some(event)) = send_and_wait(&handle.tx, command, rx).await {
                flushed.push(event);
            }
            drop(handle.tx);
            if let Err(e) = handle.task.await {
                tracing::error!(patient_id = %patient_id, "Worker task failed: {}", e);
            }
        }
        info!("Monitor shut down, {} open violation(s) flushed", flushed.len());
        flushed
    }

    /// Send a command to an existing worker. `Ok(None)` if the patient has
    /// never reported.
    async fn request<T>(
        &self,
        patient_id: &str,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> MonitorResult<Option<T>> {
        // ---
        let tx = {
            let workers = self.inner.workers.lock().await;
            match workers.get(patient_id) {
                Some(worker) => worker.tx.clone(),
                None => return Ok(None),
            }
        };
        let (reply, rx) = oneshot::channel();
        send_and_wait(&tx, make(reply), rx).await.map(Some)
    }
}

async fn send_and_wait<T>(
    tx: &mpsc::Sender<Command>,
    command: Command,
    rx: oneshot::Receiver<T>,
) -> MonitorResult<T> {
    tx.send(command)
        .await
        .map_err(|_| MonitorError::Unavailable)?;
    rx.await.map_err(|_| MonitorError::Unavailable)
}
