//! Idempotent batched sync into the remote store.
//!
//! Per batch: look up existing `first_seen_at` values, stamp every record
//! with `last_seen_at = now`, keep `first_seen_at` where the key exists
//! (else `now`), and upsert. A rejected batch is logged and skipped;
//! committed batches stay committed.

pub mod rest;
pub mod store;

pub use rest::RestStore;
pub use store::{Clock, FixedClock, MemoryStore, MonotonicClock, RecordStore, StoreError, SystemClock};

use crate::logging::{event_names, LogContext, Stage};
use gs_common::{AttendeeRecord, Error, EventId};
use serde::Serialize;
use std::sync::Arc;

/// Per-event sync accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub batches: usize,
    pub committed_batches: usize,
    pub rejected_batches: usize,
    pub records_upserted: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.rejected_batches == 0
    }
}

/// Batches records into a [`RecordStore`].
pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            store,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Upsert all records of one event.
    pub fn sync(
        &self,
        event_id: &EventId,
        records: &[AttendeeRecord],
        log: &LogContext,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for (index, chunk) in records.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            match self.sync_batch(event_id, chunk) {
                Ok(count) => {
                    report.committed_batches += 1;
                    report.records_upserted += count;
                    crate::log_event!(
                        log,
                        DEBUG,
                        event_names::SYNC_BATCH_COMMITTED,
                        Stage::Sync,
                        "Batch committed",
                        batch = index as u64,
                        records = count as u64
                    );
                }
                Err(e) => {
                    let err = Error::SyncRejected {
                        event_id: event_id.to_string(),
                        batch: index,
                        reason: e.to_string(),
                    };
                    let message = err.to_string();
                    crate::log_event!(
                        log,
                        WARN,
                        event_names::SYNC_BATCH_REJECTED,
                        Stage::Sync,
                        "Batch rejected",
                        batch = index as u64,
                        error = message.as_str()
                    );
                    report.rejected_batches += 1;
                    report.errors.push(message);
                }
            }
        }

        crate::log_event!(
            log,
            INFO,
            event_names::SYNC_FINISHED,
            Stage::Sync,
            "Sync finished",
            batches = report.batches as u64,
            rejected = report.rejected_batches as u64,
            records = report.records_upserted as u64
        );
        report
    }

    fn sync_batch(&self, event_id: &EventId, chunk: &[AttendeeRecord]) -> Result<usize, StoreError> {
        let emails: Vec<String> = chunk.iter().map(|r| r.email.clone()).collect();
        let existing = self.store.fetch_first_seen(event_id, &emails)?;
        let now = self.clock.now();

        let batch: Vec<AttendeeRecord> = chunk
            .iter()
            .map(|record| {
                let mut stamped = record.clone();
                stamped.first_seen_at = Some(existing.get(&record.email).copied().unwrap_or(now));
                stamped.last_seen_at = Some(now);
                stamped
            })
            .collect();

        self.store.upsert(&batch)?;
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn records(id: &EventId, emails: &[&str]) -> Vec<AttendeeRecord> {
        emails
            .iter()
            .filter_map(|e| AttendeeRecord::new(id.clone(), e))
            .collect()
    }

    fn engine(store: Arc<MemoryStore>, batch_size: usize) -> SyncEngine {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        SyncEngine::new(
            store,
            Arc::new(MonotonicClock::new(FixedClock(start))),
            batch_size,
        )
    }

    fn log() -> LogContext {
        LogContext::new("gs-test", "host-test")
    }

    #[test]
    fn test_sync_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), 500);
        let id = EventId::parse("evt-1").unwrap();
        let recs = records(&id, &["a@x.com", "b@x.com"]);

        let first = engine.sync(&id, &recs, &log());
        assert_eq!(first.records_upserted, 2);
        let a1 = store.get(&id, "a@x.com").unwrap();

        let second = engine.sync(&id, &recs, &log());
        assert!(second.is_complete());
        let a2 = store.get(&id, "a@x.com").unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(a1.first_seen_at, a2.first_seen_at);
        assert!(a2.last_seen_at > a1.last_seen_at);
    }

    #[test]
    fn test_batching() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), 2);
        let id = EventId::parse("evt-1").unwrap();
        let recs = records(&id, &["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"]);

        let report = engine.sync(&id, &recs, &log());
        assert_eq!(report.batches, 3);
        assert_eq!(report.committed_batches, 3);
        assert_eq!(report.records_upserted, 5);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_rejected_batch_is_skipped_not_rolled_back() {
        let store = Arc::new(MemoryStore::new());
        store.reject_batches_with("c@x.com");
        let engine = engine(store.clone(), 2);
        let id = EventId::parse("evt-1").unwrap();
        let recs = records(&id, &["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"]);

        let report = engine.sync(&id, &recs, &log());
        assert_eq!(report.batches, 3);
        assert_eq!(report.rejected_batches, 1);
        assert_eq!(report.committed_batches, 2);
        assert_eq!(report.records_upserted, 3);
        assert!(!report.is_complete());
        assert!(report.errors[0].contains("batch 1"));
        assert!(store.get(&id, "a@x.com").is_some());
        assert!(store.get(&id, "c@x.com").is_none());
        assert!(store.get(&id, "e@x.com").is_some());
    }

    #[test]
    fn test_mutable_fields_are_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), 10);
        let id = EventId::parse("evt-1").unwrap();
        let mut rec = AttendeeRecord::new(id.clone(), "a@x.com").unwrap();
        rec.status = Some("pending".into());
        engine.sync(&id, &[rec.clone()], &log());

        rec.status = Some("approved".into());
        engine.sync(&id, &[rec], &log());
        assert_eq!(
            store.get(&id, "a@x.com").unwrap().status.as_deref(),
            Some("approved")
        );
    }
}
