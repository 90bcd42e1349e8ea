//! Event and run identity types.
//!
//! An event is identified by an opaque token scraped from URLs or rendered
//! markup. Nothing beyond "prefix plus opaque suffix" is assumed about it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Default pattern for event identifiers on the hosting platform.
pub const DEFAULT_EVENT_ID_PATTERN: &str = r"evt-[A-Za-z0-9_-]+";

/// Opaque event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Parse an event id, rejecting empty tokens and embedded whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return None;
        }
        Some(EventId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem safe for any filesystem, or `None` if nothing usable remains.
    pub fn file_stem(&self) -> Option<String> {
        let stem: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let trimmed = stem.trim_matches(|c| c == '.' || c == '_');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventId::parse(s).ok_or_else(|| format!("invalid event id: {:?}", s))
    }
}

/// Compiled event-id pattern used to pull ids out of markup and URLs.
#[derive(Debug, Clone)]
pub struct EventIdPattern {
    regex: Regex,
}

impl EventIdPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// Every distinct id matching the pattern in `text`.
    pub fn extract(&self, text: &str) -> BTreeSet<EventId> {
        self.regex
            .find_iter(text)
            .filter_map(|m| EventId::parse(m.as_str()))
            .collect()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for EventIdPattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_EVENT_ID_PATTERN).expect("default event id pattern is valid"),
        }
    }
}

/// Run ID correlating all logs and progress events of one invocation.
///
/// Format: `gs-YYYYMMDD-HHMMSS-XXXX`
/// Example: `gs-20260115-143022-a7xq`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new run ID.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        let suffix = generate_base32_suffix();
        RunId(format!(
            "gs-{}-{}-{}",
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            suffix
        ))
    }

    /// Parse an existing run ID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 23 {
            return None;
        }
        let bytes = s.as_bytes();
        if !s.starts_with("gs-") || bytes.get(11) != Some(&b'-') || bytes.get(18) != Some(&b'-') {
            return None;
        }
        let date = &s[3..11];
        let time = &s[12..18];
        let suffix = &s[19..23];
        if !date.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if !time.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if !suffix.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7')) {
            return None;
        }
        Some(RunId(s.to_string()))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn generate_base32_suffix() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    let mut value = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32);
    value &= 0x000F_FFFF;
    let alphabet = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut out = String::with_capacity(4);
    for shift in [15_u32, 10, 5, 0] {
        let idx = ((value >> shift) & 0x1F) as usize;
        out.push(alphabet[idx] as char);
    }
    out
}
