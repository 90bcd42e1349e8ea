//! The crate-wide error type.
//!
//! Each variant carries a stable numeric code, a category and a remediation
//! hint. Only precondition errors abort a run; everything else is recorded
//! against the event it happened to and the run moves on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing credentials, invalid session, unreachable driver, bad config.
    Precondition,
    /// Listing sections absent or never stabilizing.
    Discovery,
    /// Every export strategy failed for an event.
    Export,
    /// Export body not decodable as tabular text.
    Parse,
    /// Remote store rejected a batch.
    Sync,
    /// Local file I/O and serialization errors.
    Io,
    /// Bugs: a worker panicked or an invariant broke.
    Internal,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Precondition => "precondition",
            ErrorCategory::Discovery => "discovery",
            ErrorCategory::Export => "export",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Sync => "sync",
            ErrorCategory::Io => "io",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // Precondition errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("session artifact invalid: {0}")]
    SessionInvalid(String),

    #[error("session artifact expired: {path}")]
    SessionExpired { path: String },

    #[error("store credentials missing: {0}")]
    CredentialsMissing(String),

    #[error("automation driver unavailable: {0}")]
    DriverUnavailable(String),

    // Discovery errors (20-29)
    #[error("discovery failed for section {section}: {reason}")]
    Discovery { section: String, reason: String },

    // Export errors (30-39)
    #[error("all export strategies exhausted for {event_id} after {attempts} attempts")]
    ExportExhausted { event_id: String, attempts: usize },

    // Parse errors (40-49)
    #[error("export for {event_id} is not tabular text: {reason}")]
    Parse { event_id: String, reason: String },

    // Sync errors (50-59)
    #[error("store rejected batch {batch} for {event_id}: {reason}")]
    SyncRejected {
        event_id: String,
        batch: usize,
        reason: String,
    },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors (90-99)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable code; the tens digit follows [`ErrorCategory`], 90s are bugs.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::SessionInvalid(_) => 11,
            Error::SessionExpired { .. } => 12,
            Error::CredentialsMissing(_) => 13,
            Error::DriverUnavailable(_) => 14,
            Error::Discovery { .. } => 20,
            Error::ExportExhausted { .. } => 30,
            Error::Parse { .. } => 40,
            Error::SyncRejected { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Internal(_) => 90,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::SessionInvalid(_)
            | Error::SessionExpired { .. }
            | Error::CredentialsMissing(_)
            | Error::DriverUnavailable(_) => ErrorCategory::Precondition,
            Error::Discovery { .. } => ErrorCategory::Discovery,
            Error::ExportExhausted { .. } => ErrorCategory::Export,
            Error::Parse { .. } => ErrorCategory::Parse,
            Error::SyncRejected { .. } => ErrorCategory::Sync,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error terminates the run.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Precondition
    }

    /// One actionable sentence for the operator.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Run 'gs-core check' to validate configuration, or check syntax in the config file."
            }
            Error::SessionInvalid(_) => {
                "The session artifact must be a storage-state JSON with platform cookies. Record it again."
            }
            Error::SessionExpired { .. } => {
                "Record a fresh session artifact and pass it with --session."
            }
            Error::CredentialsMissing(_) => {
                "Set GUEST_SYNC_STORE_URL and GUEST_SYNC_STORE_KEY, or use --dry-run."
            }
            Error::DriverUnavailable(_) => {
                "Start chromedriver (or another WebDriver server) and point --webdriver-url at it."
            }
            Error::Discovery { .. } => {
                "The listing section may be empty or renamed. Check the platform labels in the config."
            }
            Error::ExportExhausted { .. } => {
                "The export control may have moved. Re-run with -vv to see each attempt."
            }
            Error::Parse { .. } => {
                "Inspect the saved export file; the platform may have returned an error page."
            }
            Error::SyncRejected { .. } => {
                "Check the store table schema and the unique key on (event_id, email)."
            }
            Error::Io(_) => "Check disk space and permissions on the output directory.",
            Error::Json(_) => "Invalid JSON. Check the file with 'jq .'.",
            Error::Internal(_) => "This is a bug. Re-run with -vv and report the log.",
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::SessionInvalid(_) => "Invalid Session Artifact",
            Error::SessionExpired { .. } => "Session Expired",
            Error::CredentialsMissing(_) => "Missing Store Credentials",
            Error::DriverUnavailable(_) => "Automation Driver Unavailable",
            Error::Discovery { .. } => "Discovery Degraded",
            Error::ExportExhausted { .. } => "Export Failed",
            Error::Parse { .. } => "Export Not Parseable",
            Error::SyncRejected { .. } => "Store Rejected Batch",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
            Error::Internal(_) => "Internal Error",
        }
    }
}

/// JSON shape of an error on stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub fatal: bool,
    /// Event id, batch index, section and similar identifiers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let pairs: Vec<(&str, serde_json::Value)> = match err {
            Error::ExportExhausted { event_id, attempts } => {
                vec![("event_id", event_id.as_str().into()), ("attempts", (*attempts).into())]
            }
            Error::Parse { event_id, .. } => vec![("event_id", event_id.as_str().into())],
            Error::SyncRejected { event_id, batch, .. } => {
                vec![("event_id", event_id.as_str().into()), ("batch", (*batch).into())]
            }
            Error::Discovery { section, .. } => vec![("section", section.as_str().into())],
            Error::SessionExpired { path } => vec![("path", path.as_str().into())],
            _ => Vec::new(),
        };

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            fatal: err.is_fatal(),
            context: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

impl StructuredError {
    pub fn with_context(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.to_string(), value);
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!(r#"{{"code":{},"message":"unserializable error"}}"#, self.code))
    }
}

/// Three-line stderr block: headline, reason, fix.
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let paint = |code: &str, text: &str| {
        if use_color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    };
    format!(
        "{} {}\n  Reason: {err}\n  {} {}",
        paint("31", "✗"),
        err.headline(),
        paint("36", "Fix:"),
        err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_preconditions_are_fatal() {
        assert!(Error::CredentialsMissing("url".into()).is_fatal());
        assert!(Error::SessionExpired {
            path: "s.json".into()
        }
        .is_fatal());
        assert!(!Error::ExportExhausted {
            event_id: "evt-1".into(),
            attempts: 7
        }
        .is_fatal());
        assert!(!Error::Parse {
            event_id: "evt-1".into(),
            reason: "no header".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_codes_follow_categories() {
        let errs = [
            Error::Config("x".into()),
            Error::Discovery {
                section: "past".into(),
                reason: "absent".into(),
            },
            Error::ExportExhausted {
                event_id: "e".into(),
                attempts: 1,
            },
            Error::Parse {
                event_id: "e".into(),
                reason: "r".into(),
            },
            Error::SyncRejected {
                event_id: "e".into(),
                batch: 0,
                reason: "409".into(),
            },
        ];
        let expected = [
            ErrorCategory::Precondition,
            ErrorCategory::Discovery,
            ErrorCategory::Export,
            ErrorCategory::Parse,
            ErrorCategory::Sync,
        ];
        for (err, cat) in errs.iter().zip(expected) {
            assert_eq!(err.category(), cat);
        }
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::SyncRejected {
            event_id: "evt-9".into(),
            batch: 3,
            reason: "bad".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 50);
        assert!(!structured.fatal);
        assert_eq!(structured.context["batch"], serde_json::json!(3));
        assert!(structured.to_json().contains("\"category\":\"sync\""));
    }

    #[test]
    fn test_format_error_human_plain() {
        let err = Error::CredentialsMissing("GUEST_SYNC_STORE_URL".into());
        let out = format_error_human(&err, false);
        assert!(out.starts_with("✗ Missing Store Credentials"));
        assert!(out.contains("Fix: Set GUEST_SYNC_STORE_URL"));

        let colored = format_error_human(&err, true);
        assert!(colored.contains("\x1b[36mFix:\x1b[0m"));
    }
}
