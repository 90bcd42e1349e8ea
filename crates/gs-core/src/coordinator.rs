//! Bounded per-event processing.
//!
//! Workers are scoped threads pulling event indices from a shared cursor in
//! [`RunState`]. Each worker runs one event through export, normalization
//! and sync before taking the next. Failures are isolated per event: a
//! panic while processing one event aborts that event only, and the worker
//! moves on with a fresh browsing context. Browsing contexts are opened on a
//! worker's first claimed event, so idle workers never start a session.

use crate::driver::{BoxedDriver, ContextFactory};
use crate::events::{event_names as progress, Phase, ProgressEmitter, ProgressEvent};
use crate::export::ExportOrchestrator;
use crate::logging::{event_names, LogContext, Stage};
use crate::normalize::{normalize, AliasTable};
use crate::sync::SyncEngine;
use chrono::{DateTime, Utc};
use gs_common::{Error, ErrorCategory, EventId, ExportAttempt};
use gs_config::ExportMode;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

/// Final status of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Synced,
    /// Exported and normalized; no sync requested.
    Exported,
    ExportFailed,
    ParseFailed,
    /// At least one batch was rejected by the store.
    SyncPartial,
    /// The worker holding this event panicked or stopped.
    Aborted,
}

impl EventStatus {
    pub fn is_success(self) -> bool {
        matches!(self, EventStatus::Synced | EventStatus::Exported)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Synced => "synced",
            EventStatus::Exported => "exported",
            EventStatus::ExportFailed => "export_failed",
            EventStatus::ParseFailed => "parse_failed",
            EventStatus::SyncPartial => "sync_partial",
            EventStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// What happened to one event.
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub event_id: EventId,
    pub status: EventStatus,
    pub attempts: Vec<ExportAttempt>,
    pub rows_in: usize,
    pub rows_dropped: usize,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl EventOutcome {
    fn new(event_id: &EventId, status: EventStatus) -> Self {
        Self {
            event_id: event_id.clone(),
            status,
            attempts: Vec::new(),
            rows_in: 0,
            rows_dropped: 0,
            records: 0,
            file: None,
            error: None,
        }
    }

    fn failed(mut self, status: EventStatus, err: &Error) -> Self {
        self.status = status;
        self.error = Some(FailureInfo::from(err));
        self
    }
}

/// Error category and message attached to a failed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureInfo {
    pub category: ErrorCategory,
    pub code: u32,
    pub message: String,
}

impl From<&Error> for FailureInfo {
    fn from(err: &Error) -> Self {
        Self {
            category: err.category(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Failed event as listed in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailedEvent {
    pub event_id: EventId,
    pub status: EventStatus,
    pub category: ErrorCategory,
    pub message: String,
}

/// Aggregate of one coordinated run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: ExportMode,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_synced: usize,
    pub outcomes: Vec<EventOutcome>,
    pub failures: Vec<FailedEvent>,
}

impl RunSummary {
    pub fn outcome(&self, event_id: &EventId) -> Option<&EventOutcome> {
        self.outcomes.iter().find(|o| &o.event_id == event_id)
    }
}

/// Cursor and counters shared by all workers of one run.
#[derive(Debug, Default)]
pub struct RunState {
    cursor: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    outcomes: Mutex<BTreeMap<EventId, EventOutcome>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next event index below `limit`.
    fn next(&self, limit: usize) -> Option<usize> {
        self.cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| {
                (i < limit).then_some(i + 1)
            })
            .ok()
    }

    fn outcomes(&self) -> MutexGuard<'_, BTreeMap<EventId, EventOutcome>> {
        // A worker that panicked mid-insert leaves the map consistent.
        self.outcomes.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, outcome: EventOutcome) {
        if outcome.status.is_success() {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.outcomes().insert(outcome.event_id.clone(), outcome);
    }

    fn contains(&self, event_id: &EventId) -> bool {
        self.outcomes().contains_key(event_id)
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Runs export → normalize → sync for a set of events.
pub struct Coordinator {
    orchestrator: ExportOrchestrator,
    aliases: AliasTable,
    sync: Option<SyncEngine>,
    contexts: Option<Arc<dyn ContextFactory>>,
    emitter: Arc<dyn ProgressEmitter>,
    mode: ExportMode,
    workers: usize,
}

impl Coordinator {
    pub fn new(orchestrator: ExportOrchestrator, emitter: Arc<dyn ProgressEmitter>) -> Self {
        Self {
            orchestrator,
            aliases: AliasTable::default(),
            sync: None,
            contexts: None,
            emitter,
            mode: ExportMode::UiFirst,
            workers: 1,
        }
    }

    /// Without a sync engine events stop after normalization.
    pub fn with_sync(mut self, engine: SyncEngine) -> Self {
        self.sync = Some(engine);
        self
    }

    pub fn with_contexts(mut self, factory: Arc<dyn ContextFactory>) -> Self {
        self.contexts = Some(factory);
        self
    }

    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_mode(mut self, mode: ExportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Process every id. Never fails as a whole; per-event failures are in
    /// the summary.
    pub fn run(&self, ids: &[EventId], log: &LogContext) -> RunSummary {
        let started_at = Utc::now();
        let clock = Instant::now();
        let state = RunState::new();
        let total = ids.len();
        let workers = self.workers.clamp(1, total.max(1));

        crate::log_event!(
            log,
            INFO,
            event_names::RUN_STARTED,
            Stage::Init,
            "Processing events",
            events = total as u64,
            workers = workers as u64,
            mode = self.mode.to_string().as_str()
        );
        self.emitter.emit(
            ProgressEvent::new(progress::RUN_STARTED, Phase::Run)
                .with_progress(0, Some(total as u64))
                .with_detail("workers", workers)
                .with_detail("mode", self.mode.to_string()),
        );

        match self.mode {
            ExportMode::UiFirst => self.run_pool(ids, &state, workers, true, total, log),
            ExportMode::Probe => {
                // The first event runs alone through the UI so that later
                // direct fetches can use the learned template.
                self.run_pool(ids, &state, 1, true, 1, log);
                self.run_pool(ids, &state, workers, false, total, log);
            }
            ExportMode::Direct => self.run_pool(ids, &state, workers, false, total, log),
        }

        // Anything not recorded was lost to a worker that died outside an event.
        for id in ids {
            if !state.contains(id) {
                let err = Error::Internal(format!("worker stopped before finishing {}", id));
                let outcome = EventOutcome::new(id, EventStatus::Aborted)
                    .failed(EventStatus::Aborted, &err);
                self.emit_failed(&outcome, total);
                state.record(outcome);
            }
        }

        let outcomes: Vec<EventOutcome> = state.outcomes().values().cloned().collect();
        let failures = outcomes
            .iter()
            .filter(|o| !o.status.is_success())
            .map(|o| FailedEvent {
                event_id: o.event_id.clone(),
                status: o.status,
                category: o
                    .error
                    .as_ref()
                    .map(|e| e.category)
                    .unwrap_or(ErrorCategory::Export),
                message: o.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
            })
            .collect();
        let summary = RunSummary {
            mode: self.mode,
            workers,
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            processed: outcomes.len(),
            succeeded: state.succeeded(),
            failed: state.failed(),
            records_synced: outcomes
                .iter()
                .filter(|o| matches!(o.status, EventStatus::Synced | EventStatus::SyncPartial))
                .map(|o| o.records)
                .sum(),
            outcomes,
            failures,
        };

        crate::log_event!(
            log,
            INFO,
            event_names::RUN_FINISHED,
            Stage::Report,
            "Run finished",
            processed = summary.processed as u64,
            succeeded = summary.succeeded as u64,
            failed = summary.failed as u64,
            elapsed_ms = summary.elapsed_ms
        );
        self.emitter.emit(
            ProgressEvent::new(progress::RUN_COMPLETE, Phase::Run)
                .with_progress(summary.processed as u64, Some(total as u64))
                .with_elapsed_ms(summary.elapsed_ms)
                .with_detail("succeeded", summary.succeeded)
                .with_detail("failed", summary.failed),
        );
        summary
    }

    /// Drain the cursor up to `limit` with `workers` scoped threads.
    fn run_pool(
        &self,
        ids: &[EventId],
        state: &RunState,
        workers: usize,
        use_driver: bool,
        limit: usize,
        log: &LogContext,
    ) {
        let limit = limit.min(ids.len());
        thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| s.spawn(move || self.worker(ids, state, use_driver, limit, log)))
                .collect();

            for handle in handles {
                if handle.join().is_err() {
                    crate::log_event!(
                        log,
                        ERROR,
                        event_names::WORKER_PANICKED,
                        Stage::Export,
                        "Worker thread panicked"
                    );
                }
            }
        });
    }

    fn worker(
        &self,
        ids: &[EventId],
        state: &RunState,
        use_driver: bool,
        limit: usize,
        log: &LogContext,
    ) {
        let mut driver: Option<BoxedDriver> = None;
        let mut opened = false;
        while let Some(index) = state.next(limit) {
            let event_id = &ids[index];
            if use_driver && !opened {
                driver = self.open_context(log);
                opened = true;
            }
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                self.process_event(event_id, driver.as_mut(), use_driver, ids.len(), log)
            }));
            match attempt {
                Ok(outcome) => state.record(outcome),
                Err(payload) => {
                    // The context may be mid-page; the next event opens a fresh one.
                    driver = None;
                    opened = false;
                    state.record(self.aborted(event_id, &*payload, ids.len(), log));
                }
            }
        }
    }

    fn aborted(
        &self,
        event_id: &EventId,
        payload: &(dyn Any + Send),
        total: usize,
        log: &LogContext,
    ) -> EventOutcome {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let log = log.for_event(event_id.as_str());
        crate::log_event!(
            log,
            ERROR,
            event_names::WORKER_PANICKED,
            Stage::Export,
            "Event processing panicked",
            reason = reason.as_str()
        );
        let err = Error::Internal(format!("processing {} panicked: {}", event_id, reason));
        let outcome = EventOutcome::new(event_id, EventStatus::Aborted)
            .failed(EventStatus::Aborted, &err);
        self.emit_failed(&outcome, total);
        outcome
    }

    fn open_context(&self, log: &LogContext) -> Option<BoxedDriver> {
        let factory = self.contexts.as_ref()?;
        match factory.open_context() {
            Ok(driver) => Some(driver),
            Err(e) => {
                let message = e.to_string();
                crate::log_event!(
                    log,
                    WARN,
                    event_names::PRECONDITION_FAILED,
                    Stage::Export,
                    "Could not open a browsing context; UI export disabled for this worker",
                    error = message.as_str()
                );
                None
            }
        }
    }

    fn process_event(
        &self,
        event_id: &EventId,
        driver: Option<&mut BoxedDriver>,
        allow_driver: bool,
        total: usize,
        log: &LogContext,
    ) -> EventOutcome {
        let log = log.for_event(event_id.as_str());
        self.emitter.emit(
            ProgressEvent::new(progress::EVENT_STARTED, Phase::Export)
                .with_progress(0, Some(total as u64))
                .with_detail("event_id", event_id.as_str()),
        );

        let export = self.orchestrator.export(event_id, driver, allow_driver, &log);
        let mut outcome = EventOutcome::new(event_id, EventStatus::ExportFailed);
        outcome.attempts = export.attempts;
        let saved = match export.result {
            Ok(saved) => saved,
            Err(err) => {
                let outcome = outcome.failed(EventStatus::ExportFailed, &err);
                self.emit_failed(&outcome, total);
                return outcome;
            }
        };
        outcome.file = Some(saved.path.clone());
        self.emitter.emit(
            ProgressEvent::new(progress::EVENT_EXPORTED, Phase::Export)
                .with_detail("event_id", event_id.as_str())
                .with_detail("file", saved.path.display().to_string()),
        );

        let normalized = match normalize(&saved.raw, &self.aliases) {
            Ok(normalized) => normalized,
            Err(e) => {
                let err = e.into_error(event_id);
                let message = err.to_string();
                crate::log_event!(
                    log,
                    WARN,
                    event_names::NORMALIZE_FAILED,
                    Stage::Normalize,
                    "Export could not be normalized",
                    error = message.as_str()
                );
                let outcome = outcome.failed(EventStatus::ParseFailed, &err);
                self.emit_failed(&outcome, total);
                return outcome;
            }
        };
        let columns = normalized
            .columns
            .iter()
            .map(|(field, header)| format!("{}={header}", field.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        crate::log_event!(
            log,
            DEBUG,
            event_names::NORMALIZE_HEADERS,
            Stage::Normalize,
            "Columns resolved",
            columns = columns.as_str()
        );
        outcome.rows_in = normalized.rows_in;
        outcome.rows_dropped = normalized.rows_dropped;
        outcome.records = normalized.records.len();
        crate::log_event!(
            log,
            INFO,
            event_names::NORMALIZE_FINISHED,
            Stage::Normalize,
            "Export normalized",
            rows_in = normalized.rows_in as u64,
            rows_dropped = normalized.rows_dropped as u64,
            records = normalized.records.len() as u64
        );

        let Some(engine) = &self.sync else {
            outcome.status = EventStatus::Exported;
            return outcome;
        };
        let report = engine.sync(event_id, &normalized.records, &log);
        if report.is_complete() {
            outcome.status = EventStatus::Synced;
            outcome.records = report.records_upserted;
        } else {
            outcome.status = EventStatus::SyncPartial;
            outcome.records = report.records_upserted;
            let err = Error::SyncRejected {
                event_id: event_id.to_string(),
                batch: report.rejected_batches,
                reason: report.errors.join("; "),
            };
            outcome.error = Some(FailureInfo::from(&err));
        }
        self.emitter.emit(
            ProgressEvent::new(progress::EVENT_SYNCED, Phase::Sync)
                .with_detail("event_id", event_id.as_str())
                .with_detail("records", report.records_upserted)
                .with_detail("rejected_batches", report.rejected_batches),
        );
        outcome
    }

    fn emit_failed(&self, outcome: &EventOutcome, total: usize) {
        let mut event = ProgressEvent::new(progress::EVENT_FAILED, Phase::Export)
            .with_progress(0, Some(total as u64))
            .with_detail("event_id", outcome.event_id.as_str())
            .with_detail("status", outcome.status);
        if let Some(err) = &outcome.error {
            event = event.with_detail("category", err.category);
        }
        self.emitter.emit(event);
    }
}
