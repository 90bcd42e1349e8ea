//! Header alias table and canonical field resolution.
//!
//! Resolution runs in two passes over the fields in [`RESOLUTION_ORDER`]:
//! first every field tries exact alias matches, then unresolved fields try
//! substring matches with aliases longer than three characters. A header
//! claimed by one field is never reused by another.

use gs_common::CanonicalField;
use std::collections::BTreeMap;

/// Order in which fields claim headers.
pub const RESOLUTION_ORDER: [CanonicalField; 6] = [
    CanonicalField::Email,
    CanonicalField::TicketType,
    CanonicalField::Status,
    CanonicalField::RegisteredAt,
    CanonicalField::EventName,
    CanonicalField::Name,
];

/// Aliases shorter than this never match by substring.
const MIN_SUBSTRING_ALIAS: usize = 4;

/// Lowercase, trim, fold `_` to a space and collapse runs of whitespace.
pub fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Known header spellings per canonical field, in priority order.
#[derive(Debug, Clone)]
pub struct AliasTable {
    aliases: BTreeMap<CanonicalField, Vec<String>>,
}

impl Default for AliasTable {
    fn default() -> Self {
        let table: [(CanonicalField, &[&str]); 6] = [
            (
                CanonicalField::Email,
                &[
                    "email",
                    "email address",
                    "e-mail",
                    "work email",
                    "attendee email",
                    "guest email",
                ],
            ),
            (
                CanonicalField::Name,
                &["name", "full name", "guest name", "attendee name", "first name"],
            ),
            (
                CanonicalField::TicketType,
                &["ticket type", "ticket_type", "ticket", "ticket name", "tier"],
            ),
            (
                CanonicalField::Status,
                &["approval status", "status", "rsvp status", "registration status"],
            ),
            (
                CanonicalField::RegisteredAt,
                &[
                    "created_at",
                    "registered at",
                    "registration date",
                    "created",
                    "registered",
                    "date",
                ],
            ),
            (CanonicalField::EventName, &["event name", "event_title", "event"]),
        ];
        let mut aliases = BTreeMap::new();
        for (field, list) in table {
            aliases.insert(field, list.iter().map(|a| normalize_header(a)).collect());
        }
        Self { aliases }
    }
}

impl AliasTable {
    pub fn aliases(&self, field: CanonicalField) -> &[String] {
        self.aliases.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Map each resolvable canonical field to a column index.
    pub fn resolve(&self, headers: &[String]) -> HeaderMap {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut claimed = vec![false; headers.len()];
        let mut columns = BTreeMap::new();

        for field in RESOLUTION_ORDER {
            for alias in self.aliases(field) {
                let hit = normalized
                    .iter()
                    .enumerate()
                    .find(|(i, h)| !claimed[*i] && *h == alias)
                    .map(|(i, _)| i);
                if let Some(i) = hit {
                    claimed[i] = true;
                    columns.insert(field, i);
                    break;
                }
            }
        }

        for field in RESOLUTION_ORDER {
            if columns.contains_key(&field) {
                continue;
            }
            for alias in self.aliases(field) {
                if alias.chars().count() < MIN_SUBSTRING_ALIAS {
                    continue;
                }
                let hit = normalized
                    .iter()
                    .enumerate()
                    .find(|(i, h)| !claimed[*i] && h.contains(alias.as_str()))
                    .map(|(i, _)| i);
                if let Some(i) = hit {
                    claimed[i] = true;
                    columns.insert(field, i);
                    break;
                }
            }
        }

        HeaderMap { columns }
    }
}

/// Resolved canonical field → column index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    columns: BTreeMap<CanonicalField, usize>,
}

impl HeaderMap {
    pub fn column(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, usize)> + '_ {
        self.columns.iter().map(|(f, i)| (*f, *i))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Work   Email "), "work email");
        assert_eq!(normalize_header("\u{feff}approval_status"), "approval status");
        assert_eq!(normalize_header("E-Mail"), "e-mail");
    }

    #[test]
    fn test_exact_beats_substring() {
        let table = AliasTable::default();
        let map = table.resolve(&headers(&["Guest Email Verified", "Email"]));
        assert_eq!(map.column(CanonicalField::Email), Some(1));
    }

    #[test]
    fn test_event_name_not_claimed_by_name() {
        let table = AliasTable::default();
        let map = table.resolve(&headers(&["Event Name", "Full Name"]));
        assert_eq!(map.column(CanonicalField::EventName), Some(0));
        assert_eq!(map.column(CanonicalField::Name), Some(1));

        let map = table.resolve(&headers(&["Event Name"]));
        assert_eq!(map.column(CanonicalField::EventName), Some(0));
        assert_eq!(map.column(CanonicalField::Name), None);
    }

    #[test]
    fn test_alias_priority_within_field() {
        let table = AliasTable::default();
        // "name" outranks "first name" even though it appears later.
        let map = table.resolve(&headers(&["first_name", "name"]));
        assert_eq!(map.column(CanonicalField::Name), Some(1));
    }

    #[test]
    fn test_substring_fallback() {
        let table = AliasTable::default();
        let map = table.resolve(&headers(&["email", "Ticket Tier Level"]));
        assert_eq!(map.column(CanonicalField::TicketType), Some(1));
        let map = table.resolve(&headers(&["email", "ev"]));
        assert_eq!(map.column(CanonicalField::EventName), None);
    }

    #[test]
    fn test_platform_export_headers() {
        let table = AliasTable::default();
        let map = table.resolve(&headers(&[
            "api_id",
            "name",
            "first_name",
            "last_name",
            "email",
            "created_at",
            "approval_status",
            "ticket_type_id",
            "ticket_name",
        ]));
        assert_eq!(map.column(CanonicalField::Email), Some(4));
        assert_eq!(map.column(CanonicalField::Name), Some(1));
        assert_eq!(map.column(CanonicalField::RegisteredAt), Some(5));
        assert_eq!(map.column(CanonicalField::Status), Some(6));
        assert_eq!(map.column(CanonicalField::TicketType), Some(8));
        assert_eq!(map.column(CanonicalField::EventName), None);
    }

    #[test]
    fn test_scenario_headers() {
        let table = AliasTable::default();
        let map = table.resolve(&headers(&["Work Email", "Full Name"]));
        assert_eq!(map.column(CanonicalField::Email), Some(0));
        assert_eq!(map.column(CanonicalField::Name), Some(1));
        assert_eq!(map.column(CanonicalField::TicketType), None);
        assert_eq!(map.len(), 2);
    }
}
