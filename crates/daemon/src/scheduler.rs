//! Reconciliation of device state with the event calendar.
//!
//! A cycle first stops recordings whose event just ended, then starts
//! recordings for auto-start events in progress. Decisions come from live
//! device state, so running the same cycle twice is harmless. A failure on one
//! event is recorded in the report and the cycle moves on.

use crate::config::SchedulerConfig;
use crate::engine::LiveEngine;
use crate::error::{ErrorPayload, PilotError};
use crate::model::{Broadcaster, Event};
use crate::piloting::event_id_of;
use crate::store::EventStore;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stop,
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Decision logged only.
    DryRun,
    AlreadyRecording,
    /// Not recording, or recording something this system did not launch.
    NotRecording,
    /// The recorder's current file belongs to another event.
    OtherEventRecording,
    /// Another current auto-start event on the same broadcaster took precedence.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleAction {
    pub event_id: u64,
    pub broadcaster_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub event_id: u64,
    pub broadcaster_id: u64,
    pub phase: Phase,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleFailure {
    /// Unset when the failure is not tied to one event (e.g. the store is unreadable).
    pub event_id: Option<u64>,
    pub broadcaster_id: Option<u64>,
    pub phase: Phase,
    pub error: ErrorPayload,
}

/// Everything one cycle decided and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub at: NaiveDateTime,
    pub dry_run: bool,
    pub stopped: Vec<CycleAction>,
    pub started: Vec<CycleAction>,
    pub skipped: Vec<Skipped>,
    pub errors: Vec<CycleFailure>,
}

impl CycleReport {
    fn new(at: NaiveDateTime, dry_run: bool) -> Self {
        Self {
            at,
            dry_run,
            stopped: Vec::new(),
            started: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn skip(&mut self, event: &Event, phase: Phase, reason: SkipReason) {
        debug!(event_id = event.id, ?phase, ?reason, "skipped");
        self.skipped.push(Skipped {
            event_id: event.id,
            broadcaster_id: event.broadcaster_id,
            phase,
            reason,
        });
    }

    fn fail(&mut self, event: Option<&Event>, phase: Phase, error: &PilotError) {
        self.errors.push(CycleFailure {
            event_id: event.map(|e| e.id),
            broadcaster_id: event.map(|e| e.broadcaster_id),
            phase,
            error: ErrorPayload::from(error),
        });
    }
}

pub struct Scheduler {
    engine: Arc<LiveEngine>,
    grace: Duration,
    /// Serializes cycles started from the timer and from the HTTP surface.
    cycle_lock: Mutex<()>,
    last_report: RwLock<Option<CycleReport>>,
}

impl Scheduler {
    pub fn new(engine: Arc<LiveEngine>, stop_grace_minutes: u32) -> Self {
        Self {
            engine,
            grace: Duration::minutes(i64::from(stop_grace_minutes)),
            cycle_lock: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    pub fn from_config(engine: Arc<LiveEngine>, config: &SchedulerConfig) -> Self {
        Self::new(engine, config.stop_grace_minutes)
    }

    pub fn engine(&self) -> &Arc<LiveEngine> {
        &self.engine
    }

    /// Run a cycle at the engine clock's current time.
    pub async fn run_cycle_now(&self, dry_run: bool) -> CycleReport {
        let now = self.engine.clock().now();
        self.run_cycle(now, dry_run).await
    }

    pub async fn run_cycle(&self, now: NaiveDateTime, dry_run: bool) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let mut report = CycleReport::new(now, dry_run);

        info!(%now, dry_run, "reconciliation cycle started");
        self.stop_finished(now, &mut report).await;
        self.start_current(now, &mut report).await;
        info!(
            stopped = report.stopped.len(),
            started = report.started.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "reconciliation cycle finished"
        );

        *self.last_report.write().await = Some(report.clone());
        report
    }

    /// Report of the most recent cycle, if any ran.
    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    fn load_broadcaster(&self, event: &Event) -> Result<Broadcaster, PilotError> {
        self.engine.broadcaster(event.broadcaster_id)
    }

    async fn stop_finished(&self, now: NaiveDateTime, report: &mut CycleReport) {
        let events = match self.engine.store().events_ended_within(now, self.grace) {
            Ok(events) => events,
            Err(e) => {
                let e = PilotError::from(e);
                warn!(error = %e, "cannot list finished events");
                report.fail(None, Phase::Stop, &e);
                return;
            }
        };

        for event in events {
            let broadcaster = match self.load_broadcaster(&event) {
                Ok(b) => b,
                Err(e) => {
                    warn!(event_id = event.id, error = %e, "cannot stop event");
                    report.fail(Some(&event), Phase::Stop, &e);
                    continue;
                }
            };

            let controller = self.engine.controller();
            if !controller.is_recording_launched_here(&broadcaster).await {
                report.skip(&event, Phase::Stop, SkipReason::NotRecording);
                continue;
            }

            let info = controller.current_recording_info(&broadcaster).await;
            let file_name = Path::new(&info.current_file)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if let Some(owner) = event_id_of(file_name) {
                if owner != event.id {
                    info!(
                        event_id = event.id,
                        recording_event_id = owner,
                        broadcaster = %broadcaster.name,
                        "broadcaster is recording another event"
                    );
                    report.skip(&event, Phase::Stop, SkipReason::OtherEventRecording);
                    continue;
                }
            }

            if report.dry_run {
                info!(event_id = event.id, broadcaster = %broadcaster.name, "would stop recording");
                report.skip(&event, Phase::Stop, SkipReason::DryRun);
                continue;
            }

            match self.engine.stop_event(&event, &broadcaster).await {
                Ok(_) => report.stopped.push(CycleAction {
                    event_id: event.id,
                    broadcaster_id: broadcaster.id,
                }),
                Err(e) => report.fail(Some(&event), Phase::Stop, &e),
            }
        }
    }

    async fn start_current(&self, now: NaiveDateTime, report: &mut CycleReport) {
        let events = match self.engine.store().auto_start_events_at(now) {
            Ok(events) => events,
            Err(e) => {
                let e = PilotError::from(e);
                warn!(error = %e, "cannot list current events");
                report.fail(None, Phase::Start, &e);
                return;
            }
        };

        // Events come ordered by start time then id: the first of overlapping events wins
        let mut claimed: Vec<&Event> = Vec::new();

        for event in &events {
            if let Some(winner) = claimed.iter().find(|c| c.overlaps(event)) {
                warn!(
                    event_id = event.id,
                    winner_id = winner.id,
                    broadcaster_id = event.broadcaster_id,
                    "overlapping auto-start event"
                );
                report.skip(event, Phase::Start, SkipReason::Conflict);
                continue;
            }
            claimed.push(event);

            let broadcaster = match self.load_broadcaster(event) {
                Ok(b) => b,
                Err(e) => {
                    warn!(event_id = event.id, error = %e, "cannot start event");
                    report.fail(Some(event), Phase::Start, &e);
                    continue;
                }
            };

            let controller = self.engine.controller();
            if !controller.check_config(&broadcaster) {
                let e = PilotError::Configuration(format!(
                    "broadcaster {} cannot be piloted",
                    broadcaster.name
                ));
                warn!(event_id = event.id, error = %e, "cannot start event");
                report.fail(Some(event), Phase::Start, &e);
                continue;
            }

            if controller.is_recording(&broadcaster).await {
                report.skip(event, Phase::Start, SkipReason::AlreadyRecording);
                continue;
            }

            if report.dry_run {
                info!(event_id = event.id, broadcaster = %broadcaster.name, "would start recording");
                report.skip(event, Phase::Start, SkipReason::DryRun);
                continue;
            }

            match self.engine.start_event(event, &broadcaster).await {
                Ok(()) => report.started.push(CycleAction {
                    event_id: event.id,
                    broadcaster_id: broadcaster.id,
                }),
                Err(e) => report.fail(Some(event), Phase::Start, &e),
            }
        }
    }
}
