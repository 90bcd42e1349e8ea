//! Per-event export orchestration.
//!
//! The orchestrator drives an ordered list of [`ExportStrategy`]s for one
//! event until one yields an accepted body, persists it, and reports every
//! attempt. It never returns an error past its boundary: failure is an
//! [`ExportOutcome`] like any other.
//!
//! Progress through one event is tracked as a small state machine:
//!
//! ```text
//! NotStarted -> NavigatingToTarget -> AwaitingExportSurface -> Triggering
//!            -> CapturingStream -> Validating -> Saved | Failed
//! ```
//!
//! A retry or the next strategy re-enters `NavigatingToTarget`.

pub mod fetch;
pub mod persist;
pub mod retry;
pub mod strategy;
pub mod template;
pub mod validate;

pub use fetch::{FetchError, FetchResponse, HttpFetcher, UreqFetcher};
pub use persist::{export_path, persist_export};
pub use retry::{retry, AttemptFailure, Retried};
pub use strategy::{DirectFetchStrategy, ExportStrategy, StrategyResult, UiStrategy};
pub use template::LearnedTemplate;
pub use validate::{validate_body, Rejection};

use crate::driver::BoxedDriver;
use crate::logging::{event_names, LogContext, Stage};
use gs_common::{AttemptOutcome, Error, EventId, ExportAttempt, RawExport};
use gs_config::GuestSyncConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Export progress for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    NotStarted,
    NavigatingToTarget,
    AwaitingExportSurface,
    Triggering,
    CapturingStream,
    Validating,
    Saved,
    Failed,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportState::Saved | ExportState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportState::NotStarted => "not_started",
            ExportState::NavigatingToTarget => "navigating_to_target",
            ExportState::AwaitingExportSurface => "awaiting_export_surface",
            ExportState::Triggering => "triggering",
            ExportState::CapturingStream => "capturing_stream",
            ExportState::Validating => "validating",
            ExportState::Saved => "saved",
            ExportState::Failed => "failed",
        }
    }

    /// Allowed transitions. Direct fetches skip the export surface.
    pub fn can_transition_to(self, next: ExportState) -> bool {
        use ExportState::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            NavigatingToTarget | Failed => true,
            AwaitingExportSurface => self == NavigatingToTarget,
            Triggering => matches!(self, NavigatingToTarget | AwaitingExportSurface),
            CapturingStream => self == Triggering,
            Validating => self == CapturingStream,
            Saved => self == Validating,
            NotStarted => false,
        }
    }
}

impl std::fmt::Display for ExportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records and logs state transitions for one event.
#[derive(Debug)]
pub struct ExportTracker {
    state: ExportState,
    history: Vec<ExportState>,
    log: LogContext,
}

impl ExportTracker {
    pub fn new(log: LogContext) -> Self {
        Self {
            state: ExportState::NotStarted,
            history: vec![ExportState::NotStarted],
            log,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn history(&self) -> &[ExportState] {
        &self.history
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    pub fn advance(&mut self, next: ExportState) {
        let from = self.state;
        if !from.can_transition_to(next) {
            crate::log_event!(
                self.log,
                WARN,
                event_names::EXPORT_TRANSITION,
                Stage::Export,
                "Unexpected export transition",
                from = from.as_str(),
                to = next.as_str()
            );
        } else {
            crate::log_event!(
                self.log,
                DEBUG,
                event_names::EXPORT_TRANSITION,
                Stage::Export,
                "Export transition",
                from = from.as_str(),
                to = next.as_str()
            );
        }
        self.state = next;
        self.history.push(next);
    }
}

/// Accepted export, already written to disk.
#[derive(Debug, Clone)]
pub struct SavedExport {
    pub raw: RawExport,
    pub path: PathBuf,
}

/// Result of exporting one event.
#[derive(Debug)]
pub struct ExportOutcome {
    pub event_id: EventId,
    pub result: Result<SavedExport, Error>,
    pub attempts: Vec<ExportAttempt>,
    pub final_state: ExportState,
}

impl ExportOutcome {
    pub fn is_saved(&self) -> bool {
        self.result.is_ok()
    }
}

/// Ordered strategies plus the output location.
pub struct ExportOrchestrator {
    strategies: Vec<Box<dyn ExportStrategy>>,
    output_dir: PathBuf,
}

impl ExportOrchestrator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            strategies: Vec::new(),
            output_dir: output_dir.into(),
        }
    }

    /// UI trigger then direct fetch, sharing one learned template, writing
    /// into `run.output_dir`.
    pub fn standard(
        config: &GuestSyncConfig,
        fetcher: Arc<dyn HttpFetcher>,
        cookie_header: impl Into<String>,
    ) -> Self {
        let learned = Arc::new(LearnedTemplate::new());
        Self::new(&config.run.output_dir)
            .with_strategy(Box::new(UiStrategy::new(
                &config.platform,
                &config.export,
                learned.clone(),
            )))
            .with_strategy(Box::new(DirectFetchStrategy::new(
                fetcher,
                &config.platform,
                &config.export,
                cookie_header,
                learned,
            )))
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ExportStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategies(&self) -> impl Iterator<Item = &dyn ExportStrategy> {
        self.strategies.iter().map(|s| s.as_ref())
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    /// Export one event. With `allow_driver` false, strategies that need a
    /// browsing context are skipped.
    pub fn export(
        &self,
        event_id: &EventId,
        mut driver: Option<&mut BoxedDriver>,
        allow_driver: bool,
        log: &LogContext,
    ) -> ExportOutcome {
        let log = log.for_event(event_id.as_str());
        let mut tracker = ExportTracker::new(log.clone());
        let mut attempts = Vec::new();
        let mut last_kind = None;

        for strategy in &self.strategies {
            if strategy.needs_driver() && !allow_driver {
                continue;
            }
            last_kind = Some(strategy.kind());
            let result = strategy.attempt(event_id, driver.as_mut().map(|d| &mut **d), &mut tracker);
            attempts.extend(result.attempts);

            let Some(raw) = result.export else {
                continue;
            };
            return match persist_export(&self.output_dir, event_id, &raw.bytes) {
                Ok(path) => {
                    tracker.advance(ExportState::Saved);
                    let path_str = path.display().to_string();
                    crate::log_event!(
                        log,
                        INFO,
                        event_names::EXPORT_SAVED,
                        Stage::Export,
                        "Export saved",
                        strategy = strategy.kind().to_string().as_str(),
                        bytes = raw.bytes.len() as u64,
                        path = path_str.as_str()
                    );
                    ExportOutcome {
                        event_id: event_id.clone(),
                        result: Ok(SavedExport { raw, path }),
                        attempts,
                        final_state: tracker.state(),
                    }
                }
                Err(e) => {
                    tracker.advance(ExportState::Failed);
                    let message = e.to_string();
                    crate::log_event!(
                        log,
                        ERROR,
                        event_names::EXPORT_FAILED,
                        Stage::Export,
                        "Failed to write export",
                        error = message.as_str()
                    );
                    ExportOutcome {
                        event_id: event_id.clone(),
                        result: Err(Error::Io(e)),
                        attempts,
                        final_state: tracker.state(),
                    }
                }
            };
        }

        tracker.advance(ExportState::Failed);
        if let Some(kind) = last_kind {
            attempts.push(
                ExportAttempt::new(event_id, kind, AttemptOutcome::Exhausted)
                    .with_detail("all strategies exhausted"),
            );
        }
        crate::log_event!(
            log,
            WARN,
            event_names::EXPORT_FAILED,
            Stage::Export,
            "All export strategies exhausted",
            attempts = attempts.len() as u64
        );
        ExportOutcome {
            event_id: event_id.clone(),
            result: Err(Error::ExportExhausted {
                event_id: event_id.to_string(),
                attempts: attempts.len(),
            }),
            attempts,
            final_state: tracker.state(),
        }
    }
}
