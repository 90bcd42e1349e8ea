//! PostgREST-compatible remote store.

use super::store::{RecordStore, StoreError};
use chrono::{DateTime, Utc};
use gs_common::{AttendeeRecord, EventId};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Keys per lookup request; keeps the `in.(...)` filter within URL limits.
const LOOKUP_CHUNK: usize = 100;

/// Store speaking the PostgREST dialect (as served by Supabase).
#[derive(Debug, Clone)]
pub struct RestStore {
    agent: ureq::Agent,
    endpoint: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct FirstSeenRow {
    email: String,
    first_seen_at: Option<DateTime<Utc>>,
}

impl RestStore {
    /// `url` is the project base URL; `table` the attendee table.
    pub fn new(url: &str, key: impl Into<String>, table: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
            key: key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        request
            .set("apikey", &self.key)
            .set("Authorization", &format!("Bearer {}", self.key))
    }
}

/// `in.(...)` filter value with every email quoted.
pub(crate) fn in_filter(emails: &[String]) -> String {
    let quoted: Vec<String> = emails
        .iter()
        .map(|e| format!("\"{}\"", e.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

fn map_error(err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, resp) => {
            let mut message = resp.into_string().unwrap_or_default();
            message.truncate(300);
            StoreError::Rejected { status, message }
        }
        ureq::Error::Transport(transport) => StoreError::Transport(transport.to_string()),
    }
}

impl RecordStore for RestStore {
    fn fetch_first_seen(
        &self,
        event_id: &EventId,
        emails: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        let mut seen = HashMap::new();
        for chunk in emails.chunks(LOOKUP_CHUNK) {
            let request = self
                .agent
                .get(&self.endpoint)
                .query("select", "email,first_seen_at")
                .query("event_id", &format!("eq.{}", event_id))
                .query("email", &in_filter(chunk));
            let rows: Vec<FirstSeenRow> = self
                .authorize(request)
                .call()
                .map_err(map_error)?
                .into_json()
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            seen.extend(
                rows.into_iter()
                    .filter_map(|row| Some((row.email, row.first_seen_at?))),
            );
        }
        Ok(seen)
    }

    fn upsert(&self, batch: &[AttendeeRecord]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(batch).map_err(|e| StoreError::Decode(e.to_string()))?;
        let request = self
            .agent
            .post(&self.endpoint)
            .query("on_conflict", "event_id,email")
            .set("Content-Type", "application/json")
            .set("Prefer", "resolution=merge-duplicates,return=minimal");
        self.authorize(request)
            .send_json(body)
            .map_err(map_error)?;
        Ok(())
    }
}
