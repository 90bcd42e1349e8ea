//! Acceptance check for export bodies.
//!
//! Platforms answer export URLs with anything from a proper CSV attachment
//! to a login page. A body is accepted when it is non-empty and either
//! declared tabular, or ambiguous but sniffs like a delimited attendee
//! table. HTML is always rejected.

use gs_common::ContentKind;

/// Bytes examined when sniffing an ambiguous body.
pub const SNIFF_LIMIT: usize = 2048;

const IDENTITY_TOKENS: [&str; 2] = ["email", "api_id"];
const DELIMITERS: [char; 3] = [',', ';', '\t'];

/// Why a body was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    Html,
    NotTabular { content_type: Option<String> },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Empty => write!(f, "empty body"),
            Rejection::Html => write!(f, "HTML page instead of export"),
            Rejection::NotTabular { content_type } => write!(
                f,
                "body does not look like an attendee table (content-type {})",
                content_type.as_deref().unwrap_or("missing")
            ),
        }
    }
}

/// Decide whether `body` is an export, returning the resulting content kind.
pub fn validate_body(
    body: &[u8],
    content_type: Option<&str>,
    content_disposition: Option<&str>,
) -> Result<ContentKind, Rejection> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Rejection::Empty);
    }

    let head = sniff_head(body);
    let declared = ContentKind::from_content_type(content_type);

    if declared == ContentKind::Html || looks_like_html(&head) {
        return Err(Rejection::Html);
    }
    if declared.is_tabular() {
        return Ok(declared);
    }
    if is_attachment(content_disposition) {
        return Ok(ContentKind::Csv);
    }
    if looks_tabular(&head) {
        return Ok(ContentKind::Csv);
    }

    Err(Rejection::NotTabular {
        content_type: content_type.map(str::to_string),
    })
}

fn sniff_head(body: &[u8]) -> String {
    let end = body.len().min(SNIFF_LIMIT);
    String::from_utf8_lossy(&body[..end]).to_string()
}

fn looks_like_html(head: &str) -> bool {
    let start = head
        .trim_start_matches('\u{feff}')
        .trim_start()
        .to_ascii_lowercase();
    start.starts_with("<!doctype") || start.starts_with("<html")
}

fn is_attachment(content_disposition: Option<&str>) -> bool {
    content_disposition.is_some_and(|cd| cd.to_ascii_lowercase().contains("attachment"))
}

/// An identity-like header token plus a delimiter in the sniffed prefix.
fn looks_tabular(head: &str) -> bool {
    let lower = head.to_ascii_lowercase();
    IDENTITY_TOKENS.iter().any(|t| lower.contains(t)) && lower.contains(DELIMITERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &[u8] = b"api_id,name,email\ngst-1,Jane,jane@x.com\n";

    #[test]
    fn test_declared_csv_accepted() {
        assert_eq!(
            validate_body(CSV, Some("text/csv; charset=utf-8"), None),
            Ok(ContentKind::Csv)
        );
        assert_eq!(
            validate_body(b"a\tb\n", Some("text/tab-separated-values"), None),
            Ok(ContentKind::Csv)
        );
        assert_eq!(
            validate_body(b"anything", Some("text/plain"), None),
            Ok(ContentKind::Text)
        );
    }

    #[test]
    fn test_attachment_accepted() {
        assert_eq!(
            validate_body(
                b"x;y\n1;2\n",
                Some("application/octet-stream"),
                Some("attachment; filename=\"guests.csv\"")
            ),
            Ok(ContentKind::Csv)
        );
    }

    #[test]
    fn test_ambiguous_body_sniffed() {
        assert_eq!(validate_body(CSV, None, None), Ok(ContentKind::Csv));
        assert_eq!(
            validate_body(b"Email;Name\na@x.com;A\n", Some("application/json"), None),
            Ok(ContentKind::Csv)
        );
        assert!(matches!(
            validate_body(br#"{"error":"forbidden"}"#, Some("application/json"), None),
            Err(Rejection::NotTabular { .. })
        ));
    }

    #[test]
    fn test_html_always_rejected() {
        assert_eq!(
            validate_body(b"<!DOCTYPE html><html>", Some("text/plain"), None),
            Err(Rejection::Html)
        );
        assert_eq!(
            validate_body(b"email,name", Some("text/html"), None),
            Err(Rejection::Html)
        );
        assert_eq!(
            validate_body(b"  <html><body>email, x</body>", None, Some("attachment")),
            Err(Rejection::Html)
        );
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(validate_body(b"", Some("text/csv"), None), Err(Rejection::Empty));
        assert_eq!(validate_body(b" \n\t", Some("text/csv"), None), Err(Rejection::Empty));
    }

    #[test]
    fn test_sniff_only_looks_at_prefix() {
        let mut body = vec![b'x'; SNIFF_LIMIT];
        body.extend_from_slice(b"\nemail,name\n");
        assert!(validate_body(&body, None, None).is_err());
    }
}
