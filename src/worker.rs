//! Per-patient worker task.
//!
//! Each monitored patient gets exactly one task that owns the patient's
//! position log, violation tracker and last evaluation. Everything that
//! reads or changes that state arrives as a [`Command`] over the task's
//! channel, so reports for one patient are processed strictly in order
//! while different patients run concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

use crate::error::{MonitorError, MonitorResult};
use crate::evaluator::GeofenceEvaluator;
use crate::ingest::PositionLog;
use crate::models::{
    EvaluationResult, Ingested, PatientId, PatientStatus, PositionReport, TimeRange,
    ViolationCount, ViolationEvent,
};
use crate::monitor::MonitorSettings;
use crate::registry::ZoneRegistry;
use crate::tracker::ViolationTracker;

// ---

const COMMAND_BUFFER: usize = 64;

pub(crate) enum Command {
    Ingest {
        report: PositionReport,
        reply: oneshot::Sender<MonitorResult<Ingested>>,
    },
    Sweep {
        now: DateTime<Utc>,
        reply: oneshot::Sender<Option<ViolationEvent>>,
    },
    Stop {
        now: DateTime<Utc>,
        reply: oneshot::Sender<Option<ViolationEvent>>,
    },
    /// Like `Stop`, then the worker exits.
    Shutdown {
        now: DateTime<Utc>,
        reply: oneshot::Sender<Option<ViolationEvent>>,
    },
    OpenViolations {
        reply: oneshot::Sender<Vec<ViolationEvent>>,
    },
    History {
        range: TimeRange,
        reply: oneshot::Sender<Vec<ViolationEvent>>,
    },
    Counts {
        reply: oneshot::Sender<Vec<ViolationCount>>,
    },
    ResetCounts {
        reply: oneshot::Sender<()>,
    },
    RecentPositions {
        limit: usize,
        reply: oneshot::Sender<Vec<PositionReport>>,
    },
    Status {
        reply: oneshot::Sender<PatientStatus>,
    },
}

pub(crate) struct WorkerHandle {
    pub(crate) tx: mpsc::Sender<Command>,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) struct PatientWorker {
    // ---
    patient_id: PatientId,
    positions: PositionLog,
    tracker: ViolationTracker,
    evaluator: GeofenceEvaluator,
    registry: Arc<RwLock<ZoneRegistry>>,
    events: broadcast::Sender<ViolationEvent>,
    last_evaluation: Option<EvaluationResult>,
    monitoring: bool,
}

impl PatientWorker {
    /// Start the worker task for `patient_id`.
    pub(crate) fn spawn(
        patient_id: PatientId,
        settings: &MonitorSettings,
        registry: Arc<RwLock<ZoneRegistry>>,
        events: broadcast::Sender<ViolationEvent>,
    ) -> WorkerHandle {
        // ---
        let worker = PatientWorker {
            positions: PositionLog::new(patient_id.clone(), settings.history_capacity),
            tracker: ViolationTracker::new(
                patient_id.clone(),
                settings.grace_period,
                settings.event_log_capacity,
            ),
            evaluator: GeofenceEvaluator::new(settings.local_offset),
            patient_id,
            registry,
            events,
            last_evaluation: None,
            monitoring: true,
        };

        let span = tracing::info_span!("patient", patient_id = %worker.patient_id);
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(worker.run(rx).instrument(span));
        WorkerHandle { tx, task }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        // ---
        debug!("Worker started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Ingest { report, reply } => {
                    let outcome = self.ingest(report).await;
                    let _ = reply.send(outcome);
                }
                Command::Sweep { now, reply } => {
                    let closed = self.tracker.expire(now);
                    let _ = reply.send(self.settle(closed));
                }
                Command::Stop { now, reply } => {
                    let flushed = self.stop(now);
                    let _ = reply.send(flushed);
                }
                Command::Shutdown { now, reply } => {
                    let flushed = self.stop(now);
                    let _ = reply.send(flushed);
                    // Commands still queued get their reply dropped
                    break;
                }
                Command::OpenViolations { reply } => {
                    let open = self.tracker.open_event_ref().cloned();
                    let _ = reply.send(open.into_iter().collect());
                }
                Command::History { range, reply } => {
                    let _ = reply.send(self.tracker.history(&range));
                }
                Command::Counts { reply } => {
                    let _ = reply.send(self.tracker.counts());
                }
                Command::ResetCounts { reply } => {
                    self.tracker.reset_counts();
                    let _ = reply.send(());
                }
                Command::RecentPositions { limit, reply } => {
                    let _ = reply.send(self.positions.recent(limit));
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.status());
                }
            }
        }
        debug!("Worker finished");
    }

    async fn ingest(&mut self, report: PositionReport) -> MonitorResult<Ingested> {
        // ---
        if let Err(e) = self.positions.accept(report.clone()) {
            match &e {
                MonitorError::StaleReport { .. } => debug!("Ignoring report: {}", e),
                _ => info!("Rejected report: {}", e),
            }
            return Err(e);
        }

        if !self.monitoring {
            info!("Monitoring resumed");
            self.monitoring = true;
        }

        // Silence since the previous report is judged before the new position
        let mut events: Vec<ViolationEvent> =
            self.tracker.expire(report.timestamp).into_iter().collect();

        let evaluation = {
            let registry = self.registry.read().await;
            self.evaluator
                .evaluate(&report, registry.zones_for_patient(&self.patient_id))
        };
        debug!(
            compliant = evaluation.compliant,
            zone_id = ?evaluation.zone_id,
            "Evaluated position: {}",
            evaluation.reason.as_str()
        );

        events.extend(self.tracker.record(&evaluation));
        self.publish(&events);
        self.last_evaluation = Some(evaluation.clone());

        Ok(Ingested { evaluation, events })
    }

    fn stop(&mut self, now: DateTime<Utc>) -> Option<ViolationEvent> {
        // ---
        let flushed = self.tracker.stop(now);
        if self.monitoring {
            info!("Monitoring stopped");
        }
        self.monitoring = false;
        self.settle(flushed)
    }

    /// Publish an event the clock closed and make its closure final:
    /// reports stamped before the exit can no longer reopen it.
    fn settle(&mut self, closed: Option<ViolationEvent>) -> Option<ViolationEvent> {
        // ---
        let exited_at = closed.as_ref().and_then(|e| e.exited_at);
        if let Some(exited_at) = exited_at {
            self.positions.raise_floor(exited_at);
        }
        self.publish(closed.as_slice());
        closed
    }

    fn status(&self) -> PatientStatus {
        let last_position = self.positions.last().cloned();
        PatientStatus {
            patient_id: self.patient_id.clone(),
            monitoring: self.monitoring,
            is_moving: last_position.as_ref().is_some_and(PositionReport::is_moving),
            last_position,
            last_evaluation: self.last_evaluation.clone(),
            open_violation: self.tracker.open_event_ref().cloned(),
        }
    }

    fn publish(&self, events: &[ViolationEvent]) {
        for event in events {
            // No subscribers is fine; the tracker keeps its own log
            let _ = self.events.send(event.clone());
        }
    }
}
