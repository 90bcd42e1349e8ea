//! Progress events for agents watching a run.
//!
//! The coordinator reports through [`ProgressEmitter`]; the CLI decides
//! whether that means JSONL on stderr or nothing, and tests subscribe to an
//! [`EventBus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::{mpsc, Arc, Mutex};

/// Progress event names.
pub mod event_names {
    pub const RUN_STARTED: &str = "run_started";
    pub const DISCOVERY_COMPLETE: &str = "discovery_complete";
    pub const EVENT_STARTED: &str = "event_started";
    pub const EVENT_EXPORTED: &str = "event_exported";
    pub const EVENT_FAILED: &str = "event_failed";
    pub const EVENT_SYNCED: &str = "event_synced";
    pub const RUN_COMPLETE: &str = "run_complete";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Run,
    Discover,
    Export,
    Sync,
}

/// `current` of `total` events, when the total is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ProgressEvent {
    pub fn new(event: &str, phase: Phase) -> Self {
        Self {
            event: event.to_string(),
            timestamp: Utc::now(),
            run_id: None,
            phase,
            progress: None,
            elapsed_ms: None,
            details: Map::new(),
        }
    }

    pub fn with_progress(self, current: u64, total: Option<u64>) -> Self {
        Self {
            progress: Some(Progress { current, total }),
            ..self
        }
    }

    pub fn with_elapsed_ms(self, elapsed_ms: u64) -> Self {
        Self {
            elapsed_ms: Some(elapsed_ms),
            ..self
        }
    }

    /// Attach a detail; values that fail to serialize are skipped.
    pub fn with_detail(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.insert(key.to_string(), value);
        }
        self
    }
}

pub trait ProgressEmitter: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmitter;

impl ProgressEmitter for NullEmitter {
    fn emit(&self, _event: ProgressEvent) {}
}

/// In-process broadcast. Subscribers that hang up are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<ProgressEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }
}

impl ProgressEmitter for EventBus {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// One JSON object per line. Workers share it, so writes are serialized.
pub struct JsonlWriter<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> ProgressEmitter for JsonlWriter<W> {
    fn emit(&self, event: ProgressEvent) {
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{line}");
        }
    }
}

/// Stamps the run id on events that do not carry one.
pub struct RunEmitter {
    run_id: String,
    inner: Arc<dyn ProgressEmitter>,
}

impl RunEmitter {
    pub fn new(run_id: impl Into<String>, inner: Arc<dyn ProgressEmitter>) -> Self {
        Self {
            run_id: run_id.into(),
            inner,
        }
    }
}

impl ProgressEmitter for RunEmitter {
    fn emit(&self, mut event: ProgressEvent) {
        event.run_id.get_or_insert_with(|| self.run_id.clone());
        self.inner.emit(event);
    }
}
