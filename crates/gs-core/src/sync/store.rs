//! Record store interface, clocks, and the in-process store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gs_common::{AttendeeRecord, EventId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),

    #[error("store rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected store response: {0}")]
    Decode(String),
}

/// Remote attendee store keyed by `(event_id, email)`.
pub trait RecordStore: Send + Sync {
    /// Existing `first_seen_at` for the given keys; absent keys are omitted.
    fn fetch_first_seen(
        &self,
        event_id: &EventId,
        emails: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, StoreError>;

    /// Insert or merge a batch of records.
    fn upsert(&self, batch: &[AttendeeRecord]) -> Result<(), StoreError>;
}

/// Time source for sync stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that never repeats or goes backwards: each reading is at least
/// one microsecond after the previous one.
#[derive(Debug)]
pub struct MonotonicClock<C: Clock = SystemClock> {
    source: C,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock<SystemClock> {
    pub fn system() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> MonotonicClock<C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            last: Mutex::new(None),
        }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now(&self) -> DateTime<Utc> {
        let reading = self.source.now();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = match *last {
            Some(prev) if reading <= prev => prev + ChronoDuration::microseconds(1),
            _ => reading,
        };
        *last = Some(next);
        next
    }
}

/// Clock pinned to one instant; wrap in [`MonotonicClock`] for distinct
/// readings.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<(EventId, String), AttendeeRecord>>,
    reject_emails: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any batch that contains this email.
    pub fn reject_batches_with(&self, email: &str) {
        if let Ok(mut list) = self.reject_emails.lock() {
            list.push(email.to_lowercase());
        }
    }

    pub fn get(&self, event_id: &EventId, email: &str) -> Option<AttendeeRecord> {
        self.rows
            .lock()
            .ok()?
            .get(&(event_id.clone(), email.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<AttendeeRecord> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl RecordStore for MemoryStore {
    fn fetch_first_seen(
        &self,
        event_id: &EventId,
        emails: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Transport("memory store poisoned".into()))?;
        Ok(emails
            .iter()
            .filter_map(|email| {
                let row = rows.get(&(event_id.clone(), email.clone()))?;
                Some((email.clone(), row.first_seen_at?))
            })
            .collect())
    }

    fn upsert(&self, batch: &[AttendeeRecord]) -> Result<(), StoreError> {
        let rejected = self
            .reject_emails
            .lock()
            .map(|list| batch.iter().any(|r| list.contains(&r.email)))
            .unwrap_or(false);
        if rejected {
            return Err(StoreError::Rejected {
                status: 409,
                message: "batch rejected by test store".into(),
            });
        }

        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Transport("memory store poisoned".into()))?;
        for record in batch {
            let key = (record.event_id.clone(), record.email.clone());
            // Merge-duplicates semantics: the stored first_seen_at wins.
            let first_seen = rows
                .get(&key)
                .and_then(|existing| existing.first_seen_at)
                .or(record.first_seen_at);
            let mut merged = record.clone();
            merged.first_seen_at = first_seen;
            rows.insert(key, merged);
        }
        Ok(())
    }
}
