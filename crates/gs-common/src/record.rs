//! Canonical attendee record and the transient export types that feed it.

use crate::id::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical fields that raw export columns are mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Email,
    Name,
    TicketType,
    Status,
    RegisteredAt,
    EventName,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 6] = [
        CanonicalField::Email,
        CanonicalField::Name,
        CanonicalField::TicketType,
        CanonicalField::Status,
        CanonicalField::RegisteredAt,
        CanonicalField::EventName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Email => "email",
            CanonicalField::Name => "name",
            CanonicalField::TicketType => "ticket_type",
            CanonicalField::Status => "status",
            CanonicalField::RegisteredAt => "registered_at",
            CanonicalField::EventName => "event_name",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attendee of one event, as stored remotely.
///
/// `(event_id, email)` is the store key. `email` is always trimmed and
/// lowercased; records are never built without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendeeRecord {
    pub email: String,
    pub event_id: EventId,
    pub event_name: Option<String>,
    pub name: Option<String>,
    pub ticket_type: Option<String>,
    pub status: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    /// Every original column, keyed by the header exactly as exported.
    pub raw: BTreeMap<String, String>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl AttendeeRecord {
    /// Build a record with the identity already normalized.
    ///
    /// Returns `None` when the email is empty after trimming.
    pub fn new(event_id: EventId, email: &str) -> Option<Self> {
        let email = normalize_email(email)?;
        Some(Self {
            email,
            event_id,
            event_name: None,
            name: None,
            ticket_type: None,
            status: None,
            registered_at: None,
            raw: BTreeMap::new(),
            first_seen_at: None,
            last_seen_at: None,
        })
    }

    /// Store key.
    pub fn key(&self) -> (&EventId, &str) {
        (&self.event_id, self.email.as_str())
    }
}

/// Trim and lowercase an identity value; `None` if nothing is left.
pub fn normalize_email(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Declared or sniffed kind of an export body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Csv,
    Text,
    Html,
    Json,
    Unknown,
}

impl ContentKind {
    /// Classify a `content-type` header value.
    pub fn from_content_type(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return ContentKind::Unknown;
        };
        let ct = value.to_ascii_lowercase();
        if ct.contains("csv") || ct.contains("tab-separated-values") {
            ContentKind::Csv
        } else if ct.contains("html") {
            ContentKind::Html
        } else if ct.contains("json") {
            ContentKind::Json
        } else if ct.starts_with("text/") {
            ContentKind::Text
        } else {
            ContentKind::Unknown
        }
    }

    /// Whether the declared kind is tabular or plain text on its own.
    pub fn is_tabular(self) -> bool {
        matches!(self, ContentKind::Csv | ContentKind::Text)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentKind::Csv => "csv",
            ContentKind::Text => "text",
            ContentKind::Html => "html",
            ContentKind::Json => "json",
            ContentKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Accepted raw export body, consumed once by the normalizer.
#[derive(Debug, Clone)]
pub struct RawExport {
    pub event_id: EventId,
    pub bytes: Vec<u8>,
    pub kind: ContentKind,
    /// URL the body was fetched or captured from, when observable.
    pub source_url: Option<String>,
    /// Event title observed while exporting, if any.
    pub event_title: Option<String>,
}

/// Export strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Ui,
    DirectFetch,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Ui => write!(f, "ui"),
            StrategyKind::DirectFetch => write!(f, "direct_fetch"),
        }
    }
}

/// Outcome of one export attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Rejected,
    Exhausted,
}

impl AttemptOutcome {
    /// Only timeouts are worth repeating with the same inputs.
    pub fn is_retryable(self) -> bool {
        matches!(self, AttemptOutcome::Timeout)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::Rejected => "rejected",
            AttemptOutcome::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Record of one export attempt; transient, reported but never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportAttempt {
    pub event_id: EventId,
    pub strategy: StrategyKind,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExportAttempt {
    pub fn new(event_id: &EventId, strategy: StrategyKind, outcome: AttemptOutcome) -> Self {
        Self {
            event_id: event_id.clone(),
            strategy,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt() -> EventId {
        EventId::parse("evt-1").unwrap()
    }

    #[test]
    fn test_record_requires_email() {
        assert!(AttendeeRecord::new(evt(), "   ").is_none());
        let rec = AttendeeRecord::new(evt(), "  Jane@Example.COM ").unwrap();
        assert_eq!(rec.email, "jane@example.com");
        assert_eq!(rec.key(), (&evt(), "jane@example.com"));
    }

    #[test]
    fn test_content_kind_from_header() {
        assert_eq!(
            ContentKind::from_content_type(Some("text/csv; charset=utf-8")),
            ContentKind::Csv
        );
        assert_eq!(ContentKind::from_content_type(Some("text/plain")), ContentKind::Text);
        assert_eq!(ContentKind::from_content_type(Some("text/html")), ContentKind::Html);
        assert_eq!(
            ContentKind::from_content_type(Some("application/json")),
            ContentKind::Json
        );
        assert_eq!(
            ContentKind::from_content_type(Some("application/octet-stream")),
            ContentKind::Unknown
        );
        assert_eq!(ContentKind::from_content_type(None), ContentKind::Unknown);
    }

    #[test]
    fn test_attempt_outcome_retryable() {
        assert!(AttemptOutcome::Timeout.is_retryable());
        assert!(!AttemptOutcome::Rejected.is_retryable());
        assert!(!AttemptOutcome::Success.is_retryable());
    }

    #[test]
    fn test_record_serializes_null_fields() {
        let rec = AttendeeRecord::new(evt(), "a@x.com").unwrap();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["ticket_type"], serde_json::Value::Null);
        assert_eq!(json["event_id"], "evt-1");
    }
}
