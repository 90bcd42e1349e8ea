//! guest-sync common types, IDs, and errors.
//!
//! This crate provides foundational types shared across gs-core modules:
//! - Event and run identity types
//! - The canonical attendee record and transient export types
//! - Common error taxonomy with stable codes
//! - Output format selection

pub mod error;
pub mod id;
pub mod output;
pub mod record;

pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError};
pub use id::{EventId, EventIdPattern, RunId, DEFAULT_EVENT_ID_PATTERN};
pub use output::OutputFormat;
pub use record::{
    normalize_email, AttemptOutcome, AttendeeRecord, CanonicalField, ContentKind, ExportAttempt,
    RawExport, StrategyKind,
};

/// Schema version of the JSON payloads printed on stdout.
pub const SCHEMA_VERSION: &str = "1.0.0";
