//! Raw export to canonical attendee records.
//!
//! Exports are delimited text with a header row, but the delimiter, the
//! header spellings and the encoding all vary. The normalizer sniffs the
//! delimiter, resolves headers through the [`AliasTable`], and turns each
//! row into an [`AttendeeRecord`]. Rows without an identity are dropped and
//! counted; they never reach the store.

pub mod aliases;

pub use aliases::{normalize_header, AliasTable, HeaderMap, RESOLUTION_ORDER};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use gs_common::{AttendeeRecord, CanonicalField, EventId, RawExport};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Normalization failures. Individual bad rows are not errors.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("export has no header row")]
    NoHeader,

    #[error("unreadable header row: {0}")]
    Header(String),
}

impl NormalizeError {
    pub fn into_error(self, event_id: &EventId) -> gs_common::Error {
        gs_common::Error::Parse {
            event_id: event_id.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Canonical records of one export plus row accounting.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedExport {
    pub event_id: EventId,
    pub records: Vec<AttendeeRecord>,
    /// Data rows read, excluding the header.
    pub rows_in: usize,
    /// Rows dropped for a missing identity value.
    pub rows_dropped: usize,
    /// Rows folded into a later row with the same identity.
    pub duplicates_collapsed: usize,
    /// Source header chosen for each resolved canonical field.
    pub columns: BTreeMap<CanonicalField, String>,
}

/// Parse a raw export into canonical records.
pub fn normalize(raw: &RawExport, aliases: &AliasTable) -> Result<NormalizedExport, NormalizeError> {
    let text = String::from_utf8_lossy(&raw.bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let delimiter = sniff_delimiter(text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let header_row = reader
        .headers()
        .map_err(|e| NormalizeError::Header(e.to_string()))?
        .clone();
    let headers: Vec<String> = header_row.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(NormalizeError::NoHeader);
    }

    let map = aliases.resolve(&headers);
    let raw_keys = unique_keys(&headers);
    let columns = map
        .iter()
        .map(|(field, idx)| (field, headers[idx].clone()))
        .collect();

    let mut records: Vec<AttendeeRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut rows_in = 0;
    let mut rows_dropped = 0;
    let mut duplicates_collapsed = 0;

    for row in reader.records() {
        rows_in += 1;
        // Flexible mode only errors on I/O, which an in-memory reader cannot
        // produce; treat anything else as an unusable row.
        let Ok(row) = row else {
            rows_dropped += 1;
            continue;
        };

        let cell = |field: CanonicalField| -> Option<String> {
            let value = row.get(map.column(field)?)?.trim();
            (!value.is_empty()).then(|| value.to_string())
        };

        let Some(mut record) = cell(CanonicalField::Email)
            .and_then(|email| AttendeeRecord::new(raw.event_id.clone(), &email))
        else {
            rows_dropped += 1;
            continue;
        };

        record.name = cell(CanonicalField::Name);
        record.ticket_type = cell(CanonicalField::TicketType);
        record.status = cell(CanonicalField::Status);
        record.registered_at = cell(CanonicalField::RegisteredAt).and_then(|v| parse_timestamp(&v));
        record.event_name = cell(CanonicalField::EventName).or_else(|| {
            raw.event_title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        });
        record.raw = raw_keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), row.get(i).unwrap_or("").to_string()))
            .collect();

        match positions.get(&record.email) {
            Some(&pos) => {
                records[pos] = record;
                duplicates_collapsed += 1;
            }
            None => {
                positions.insert(record.email.clone(), records.len());
                records.push(record);
            }
        }
    }

    Ok(NormalizedExport {
        event_id: raw.event_id.clone(),
        records,
        rows_in,
        rows_dropped,
        duplicates_collapsed,
        columns,
    })
}

/// Pick the delimiter that occurs most in the header line, outside quotes.
pub fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let mut counts = [(b',', 0usize), (b';', 0), (b'\t', 0)];
    let mut in_quotes = false;
    for ch in header.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => counts[0].1 += 1,
            ';' if !in_quotes => counts[1].1 += 1,
            '\t' if !in_quotes => counts[2].1 += 1,
            _ => {}
        }
    }
    // Ties keep the earlier (more common) delimiter.
    let mut best = counts[0];
    for candidate in &counts[1..] {
        if candidate.1 > best.1 {
            best = *candidate;
        }
    }
    best.0
}

/// Raw map keys: original headers, with repeats suffixed `_2`, `_3`, ...
fn unique_keys(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    headers
        .iter()
        .map(|h| {
            let n = seen.entry(h.as_str()).or_insert(0);
            *n += 1;
            if *n == 1 {
                h.clone()
            } else {
                format!("{}_{}", h, n)
            }
        })
        .collect()
}

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%m/%d/%Y", "%Y-%m-%d"];

/// Generic timestamp parsing; naive values are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = value.parse().ok()?;
        // Thirteen digits and up are milliseconds.
        return if n >= 100_000_000_000 {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_common::ContentKind;

    fn raw(body: &[u8]) -> RawExport {
        RawExport {
            event_id: EventId::parse("evt-1").unwrap(),
            bytes: body.to_vec(),
            kind: ContentKind::Csv,
            source_url: None,
            event_title: None,
        }
    }

    fn run(body: &[u8]) -> NormalizedExport {
        normalize(&raw(body), &AliasTable::default()).unwrap()
    }

    #[test]
    fn test_scenario_work_email() {
        let out = run(b"\"Work Email\",\"Full Name\"\n\"A@x.com\",\"Jane\"\n\" b@x.com \",\"Bob\"\n");
        let emails: Vec<&str> = out.records.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
        assert!(out.records.iter().all(|r| r.ticket_type.is_none()));
        assert_eq!(out.records[0].name.as_deref(), Some("Jane"));
        assert_eq!(out.records[1].raw["Work Email"], " b@x.com ");
        assert_eq!(out.rows_dropped, 0);
    }

    #[test]
    fn test_rows_without_identity_are_dropped() {
        let out = run(b"email,name\na@x.com,A\n,B\n   ,C\nd@x.com,D\n");
        assert_eq!(out.rows_in, 4);
        assert_eq!(out.rows_dropped, 2);
        assert_eq!(out.records.len(), 2);
    }

    #[test]
    fn test_missing_identity_column_drops_everything() {
        let out = run(b"name,ticket\nA,VIP\n");
        assert_eq!(out.rows_in, 1);
        assert_eq!(out.rows_dropped, 1);
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_empty_body_has_no_header() {
        assert!(matches!(
            normalize(&raw(b""), &AliasTable::default()),
            Err(NormalizeError::NoHeader)
        ));
        assert!(matches!(
            normalize(&raw(b"\n\n"), &AliasTable::default()),
            Err(NormalizeError::NoHeader)
        ));
    }

    #[test]
    fn test_semicolon_bom_and_latin1() {
        let mut body = b"\xef\xbb\xbfEmail;Name;Status\n".to_vec();
        body.extend_from_slice(b"jos\xe9@x.com;Jos\xe9;approved\n");
        let out = run(&body);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].status.as_deref(), Some("approved"));
        assert!(out.records[0].email.starts_with("jos"));
        assert!(out.records[0].raw.contains_key("Email"));
    }

    #[test]
    fn test_tab_delimited_with_short_rows() {
        let out = run(b"email\tname\tticket type\na@x.com\tA\nb@x.com\tB\tVIP\textra\n");
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].ticket_type, None);
        assert_eq!(out.records[1].ticket_type.as_deref(), Some("VIP"));
        assert_eq!(out.records[0].raw["ticket type"], "");
    }

    #[test]
    fn test_duplicates_collapse_to_last_row() {
        let out = run(b"email,name\na@x.com,First\nA@X.com,Second\nb@x.com,B\n");
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.duplicates_collapsed, 1);
        assert_eq!(out.records[0].email, "a@x.com");
        assert_eq!(out.records[0].name.as_deref(), Some("Second"));
    }

    #[test]
    fn test_event_name_falls_back_to_title() {
        let mut export = raw(b"email\na@x.com\n");
        export.event_title = Some(" Launch Party ".to_string());
        let out = normalize(&export, &AliasTable::default()).unwrap();
        assert_eq!(out.records[0].event_name.as_deref(), Some("Launch Party"));

        let out = run(b"email,event name\na@x.com,Meetup\n");
        assert_eq!(out.records[0].event_name.as_deref(), Some("Meetup"));
    }

    #[test]
    fn test_duplicate_headers_kept_in_raw() {
        let out = run(b"email,note,note\na@x.com,one,two\n");
        assert_eq!(out.records[0].raw["note"], "one");
        assert_eq!(out.records[0].raw["note_2"], "two");
    }

    #[test]
    fn test_columns_report() {
        let out = run(b"Guest Email,Ticket Name\na@x.com,GA\n");
        assert_eq!(out.columns[&CanonicalField::Email], "Guest Email");
        assert_eq!(out.columns[&CanonicalField::TicketType], "Ticket Name");
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a,b,c\n1;2"), b',');
        assert_eq!(sniff_delimiter("a;b;c"), b';');
        assert_eq!(sniff_delimiter("a\tb"), b'\t');
        assert_eq!(sniff_delimiter("\"a;b\",c"), b',');
        assert_eq!(sniff_delimiter("single"), b',');
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expect = Utc.with_ymd_and_hms(2024, 5, 1, 18, 22, 31).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T18:22:31Z"), Some(expect));
        assert_eq!(parse_timestamp("2024-05-01T20:22:31+02:00"), Some(expect));
        assert_eq!(parse_timestamp("Wed, 01 May 2024 18:22:31 +0000"), Some(expect));
        assert_eq!(parse_timestamp("2024-05-01 18:22:31"), Some(expect));
        assert_eq!(parse_timestamp("2024-05-01T18:22:31.000"), Some(expect));
        assert_eq!(parse_timestamp("05/01/2024 18:22:31"), Some(expect));
        assert_eq!(parse_timestamp("1714587751"), Some(expect));
        assert_eq!(parse_timestamp("1714587751000"), Some(expect));

        let midnight = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01"), Some(midnight));
        assert_eq!(parse_timestamp("05/01/2024"), Some(midnight));

        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_unparseable_date_is_null_not_error() {
        let out = run(b"email,created_at\na@x.com,not a date\n");
        assert_eq!(out.records[0].registered_at, None);
        assert_eq!(out.records[0].raw["created_at"], "not a date");
    }
}
