//! Normalizer behaviour over whole exports.

use gs_common::{ContentKind, EventId, RawExport};
use gs_core::normalize::{normalize, AliasTable, NormalizedExport};
use proptest::prelude::*;

fn raw(body: &str) -> RawExport {
    RawExport {
        event_id: EventId::parse("evt-prop").unwrap(),
        bytes: body.as_bytes().to_vec(),
        kind: ContentKind::Csv,
        source_url: None,
        event_title: None,
    }
}

fn run(body: &str) -> NormalizedExport {
    normalize(&raw(body), &AliasTable::default()).unwrap()
}

#[test]
fn test_alternate_headers_and_padded_emails() {
    let out = run("\"Work Email\",\"Full Name\"\n\"A@x.com\",\"Jane\"\n\" b@x.com \",\"Bob\"\n");

    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[0].email, "a@x.com");
    assert_eq!(out.records[0].name.as_deref(), Some("Jane"));
    assert_eq!(out.records[1].email, "b@x.com");
    assert_eq!(out.records[1].name.as_deref(), Some("Bob"));
    assert!(out.records.iter().all(|r| r.ticket_type.is_none()));
    assert_eq!(out.records[0].raw["Work Email"], "A@x.com");
}

#[test]
fn test_semicolon_export_with_bom() {
    let out = run("\u{feff}Email;Name;Status\nx@y.org;X;approved\n;Nobody;declined\n");
    assert_eq!(out.rows_in, 2);
    assert_eq!(out.rows_dropped, 1);
    assert_eq!(out.records[0].status.as_deref(), Some("approved"));
}

#[derive(Debug, Clone)]
struct Row {
    email: Option<String>,
    name: String,
}

fn row() -> impl Strategy<Value = Row> {
    (
        prop::option::weighted(0.8, "[a-z]{1,6}@[a-z]{1,5}\\.com"),
        "[A-Za-z]{0,6}",
    )
        .prop_map(|(email, name)| Row { email, name })
}

fn body(rows: &[Row]) -> String {
    let mut out = String::from("Email,Name\n");
    for r in rows {
        out.push_str(&format!("{},{}\n", r.email.as_deref().unwrap_or(""), r.name));
    }
    out
}

proptest! {
    #[test]
    fn prop_row_accounting(rows in prop::collection::vec(row(), 0..40)) {
        let out = run(&body(&rows));
        let blank = rows.iter().filter(|r| r.email.is_none()).count();
        let distinct: std::collections::BTreeSet<&str> =
            rows.iter().filter_map(|r| r.email.as_deref()).collect();

        prop_assert_eq!(out.rows_in, rows.len());
        prop_assert_eq!(out.rows_dropped, blank);
        prop_assert_eq!(out.records.len(), distinct.len());
        prop_assert_eq!(
            out.records.len() + out.duplicates_collapsed + out.rows_dropped,
            out.rows_in
        );
    }

    #[test]
    fn prop_email_is_trimmed_and_lowercased(
        local in "[a-zA-Z]{1,8}",
        domain in "[a-zA-Z]{1,8}",
        pad_left in " {0,3}",
        pad_right in " {0,3}",
    ) {
        let cell = format!("{pad_left}{local}@{domain}.COM{pad_right}");
        let out = run(&format!("Email\n{cell}\n"));
        prop_assert_eq!(out.records.len(), 1);
        prop_assert_eq!(
            &out.records[0].email,
            &format!("{}@{}.com", local.to_lowercase(), domain.to_lowercase())
        );
    }

    #[test]
    fn prop_exact_header_beats_substring(email_first in any::<bool>()) {
        let headers = if email_first {
            "Email,Email Opt In"
        } else {
            "Email Opt In,Email"
        };
        let row = if email_first { "a@x.com,yes" } else { "yes,a@x.com" };
        let out = run(&format!("{headers}\n{row}\n"));
        prop_assert_eq!(out.records.len(), 1);
        prop_assert_eq!(&out.records[0].email, "a@x.com");
    }
}
