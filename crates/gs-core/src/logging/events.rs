//! Event vocabulary: levels, pipeline stages, event names and the
//! per-run correlation context.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity as written to JSONL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            Level::Error
        } else if level == tracing::Level::WARN {
            Level::Warn
        } else if level == tracing::Level::INFO {
            Level::Info
        } else if level == tracing::Level::DEBUG {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}

/// Where in a run an event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup, configuration and precondition checks.
    Init,
    /// Listing-section enumeration.
    Discover,
    /// Per-event export strategies.
    Export,
    /// Raw export to canonical records.
    Normalize,
    /// Remote store upserts.
    Sync,
    /// Run summary rendering.
    Report,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Discover => "discover",
            Stage::Export => "export",
            Stage::Normalize => "normalize",
            Stage::Sync => "sync",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dotted event names, used as the tracing target of every log line.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const SESSION_LOADED: &str = "session.loaded";
    pub const PRECONDITION_FAILED: &str = "precondition.failed";

    pub const DISCOVER_SECTION_OPENED: &str = "discover.section_opened";
    pub const DISCOVER_SECTION_SKIPPED: &str = "discover.section_skipped";
    pub const DISCOVER_SCROLL_CAPPED: &str = "discover.scroll_capped";
    pub const DISCOVER_DISMISS_FAILED: &str = "discover.dismiss_failed";
    pub const DISCOVER_FINISHED: &str = "discover.finished";

    pub const EXPORT_TRANSITION: &str = "export.transition";
    pub const EXPORT_ATTEMPT: &str = "export.attempt";
    pub const EXPORT_TEMPLATE_LEARNED: &str = "export.template_learned";
    pub const EXPORT_SAVED: &str = "export.saved";
    pub const EXPORT_FAILED: &str = "export.failed";

    pub const NORMALIZE_HEADERS: &str = "normalize.headers";
    pub const NORMALIZE_FINISHED: &str = "normalize.finished";
    pub const NORMALIZE_FAILED: &str = "normalize.failed";

    pub const SYNC_BATCH_COMMITTED: &str = "sync.batch_committed";
    pub const SYNC_BATCH_REJECTED: &str = "sync.batch_rejected";
    pub const SYNC_FINISHED: &str = "sync.finished";

    pub const WORKER_PANICKED: &str = "worker.panicked";
}

/// Correlation ids stamped on every event of a run.
///
/// Workers derive a child with [`LogContext::for_event`] while they hold an
/// event; run-level logs leave `event_id` unset.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
    pub event_id: Option<String>,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
            event_id: None,
        }
    }

    pub fn for_event(&self, event_id: impl Into<String>) -> Self {
        LogContext {
            event_id: Some(event_id.into()),
            ..self.clone()
        }
    }

    /// Empty when no event is held.
    pub fn event_id_str(&self) -> &str {
        self.event_id.as_deref().unwrap_or_default()
    }
}
