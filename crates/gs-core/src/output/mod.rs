//! Command payload rendering.
//!
//! stdout carries exactly one payload per command, in the format chosen with
//! `--format`. JSON payloads are wrapped in an envelope carrying the schema
//! version and run id so they can be correlated with the JSONL log stream.

pub mod report;

pub use report::{CheckItem, CheckReport, RunReport};

use chrono::{DateTime, Utc};
use gs_common::{OutputFormat, SCHEMA_VERSION};
use serde::Serialize;

/// A payload that can be rendered in every output format.
pub trait Render: Serialize {
    /// Markdown document.
    fn render_md(&self) -> String;

    /// One line for quick status checks.
    fn render_summary(&self) -> String;
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    run_id: &'a str,
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    data: &'a T,
}

/// Render `value` for stdout. `None` means print nothing.
pub fn render<T: Render>(
    value: &T,
    format: OutputFormat,
    command: &str,
    run_id: &str,
) -> Result<Option<String>, serde_json::Error> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            run_id,
            generated_at: Utc::now(),
            data: value,
        })?,
        OutputFormat::Md => value.render_md(),
        OutputFormat::Summary => value.render_summary(),
        OutputFormat::Exitcode => return Ok(None),
    };
    Ok(Some(text))
}

/// Escape a value for a markdown table cell.
pub(crate) fn md_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Probe {
        answer: u32,
    }

    impl Render for Probe {
        fn render_md(&self) -> String {
            format!("# Probe\n\n{}\n", self.answer)
        }

        fn render_summary(&self) -> String {
            format!("answer={}", self.answer)
        }
    }

    #[test]
    fn test_json_envelope_flattens_payload() {
        let out = render(&Probe { answer: 42 }, OutputFormat::Json, "probe", "gs-1")
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert_eq!(value["command"], "probe");
        assert_eq!(value["run_id"], "gs-1");
        assert_eq!(value["answer"], 42);
    }

    #[test]
    fn test_other_formats() {
        let p = Probe { answer: 7 };
        assert_eq!(
            render(&p, OutputFormat::Summary, "probe", "gs-1").unwrap().as_deref(),
            Some("answer=7")
        );
        assert!(render(&p, OutputFormat::Md, "probe", "gs-1")
            .unwrap()
            .unwrap()
            .starts_with("# Probe"));
        assert!(render(&p, OutputFormat::Exitcode, "probe", "gs-1").unwrap().is_none());
    }

    #[test]
    fn test_md_cell_escapes_pipes() {
        assert_eq!(md_cell("a|b\nc"), "a\\|b c");
    }
}
