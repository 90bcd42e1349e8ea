//! Payloads printed by the CLI subcommands.

use super::{md_cell, Render};
use crate::coordinator::RunSummary;
use crate::discovery::DiscoveryResult;
use crate::normalize::NormalizedExport;
use gs_config::ConfigSnapshot;
use serde::Serialize;
use std::fmt::Write;

/// Result of `run` and `export`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub export_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryResult>,
    pub summary: RunSummary,
    pub config: ConfigSnapshot,
}

impl Render for RunReport {
    fn render_md(&self) -> String {
        let s = &self.summary;
        let mut out = String::from("# guest-sync run\n\n");
        let _ = writeln!(
            out,
            "Mode `{}` with {} worker(s){}.\n",
            s.mode,
            s.workers,
            if self.dry_run { ", dry run" } else { "" }
        );
        let _ = writeln!(out, "- Events processed: {}", s.processed);
        let _ = writeln!(out, "- Succeeded: {}", s.succeeded);
        let _ = writeln!(out, "- Failed: {}", s.failed);
        if !self.export_only {
            let _ = writeln!(out, "- Records synced: {}", s.records_synced);
        }
        let _ = writeln!(out, "- Elapsed: {:.1}s", s.elapsed_ms as f64 / 1000.0);

        if let Some(discovery) = &self.discovery {
            out.push('\n');
            out.push_str(&sections_table(discovery));
        }

        if !s.outcomes.is_empty() {
            out.push_str("\n## Events\n\n");
            out.push_str("| Event | Status | Rows | Dropped | Records | Attempts |\n");
            out.push_str("|---|---|---:|---:|---:|---:|\n");
            for o in &s.outcomes {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} |",
                    md_cell(o.event_id.as_str()),
                    o.status,
                    o.rows_in,
                    o.rows_dropped,
                    o.records,
                    o.attempts.len()
                );
            }
        }

        if !s.failures.is_empty() {
            out.push_str("\n## Failures\n\n");
            for f in &s.failures {
                let _ = writeln!(out, "- `{}` ({}): {}", f.event_id, f.category, f.message);
            }
        }
        out
    }

    fn render_summary(&self) -> String {
        let s = &self.summary;
        let mut line = format!(
            "{} events: {} succeeded, {} failed",
            s.processed, s.succeeded, s.failed
        );
        if !self.export_only {
            let _ = write!(line, ", {} records synced", s.records_synced);
        }
        let _ = write!(line, " in {:.1}s", s.elapsed_ms as f64 / 1000.0);
        if self.dry_run {
            line.push_str(" (dry run)");
        }
        line
    }
}

fn sections_table(discovery: &DiscoveryResult) -> String {
    let mut out = String::from("## Sections\n\n| Section | Status | Ids | Scrolls | Note |\n|---|---|---:|---:|---|\n");
    for section in &discovery.sections {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            md_cell(&section.section),
            section.status,
            section.ids_found,
            section.scrolls,
            md_cell(section.reason.as_deref().unwrap_or(""))
        );
    }
    out
}

impl Render for DiscoveryResult {
    fn render_md(&self) -> String {
        let mut out = format!("# Discovered events\n\n{} unique event(s).\n\n", self.ids.len());
        out.push_str(&sections_table(self));
        if !self.ids.is_empty() {
            out.push_str("\n## Ids\n\n");
            for id in &self.ids {
                let _ = writeln!(out, "- `{}`", id);
            }
        }
        out
    }

    fn render_summary(&self) -> String {
        let sections: Vec<String> = self
            .sections
            .iter()
            .map(|s| format!("{} {}/{}", s.section, s.status, s.ids_found))
            .collect();
        format!("{} events ({})", self.ids.len(), sections.join(", "))
    }
}

impl Render for NormalizedExport {
    fn render_md(&self) -> String {
        let mut out = format!("# Normalized export `{}`\n\n", self.event_id);
        let _ = writeln!(out, "- Rows read: {}", self.rows_in);
        let _ = writeln!(out, "- Rows dropped (no email): {}", self.rows_dropped);
        let _ = writeln!(out, "- Duplicates collapsed: {}", self.duplicates_collapsed);
        let _ = writeln!(out, "- Records: {}\n", self.records.len());

        out.push_str("## Columns\n\n| Field | Source header |\n|---|---|\n");
        for (field, header) in &self.columns {
            let _ = writeln!(out, "| {} | {} |", field, md_cell(header));
        }

        if !self.records.is_empty() {
            out.push_str("\n## Records\n\n| Email | Name | Ticket | Status |\n|---|---|---|---|\n");
            for r in &self.records {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    md_cell(&r.email),
                    md_cell(r.name.as_deref().unwrap_or("")),
                    md_cell(r.ticket_type.as_deref().unwrap_or("")),
                    md_cell(r.status.as_deref().unwrap_or(""))
                );
            }
        }
        out
    }

    fn render_summary(&self) -> String {
        format!(
            "{}: {} records from {} rows ({} dropped, {} duplicates)",
            self.event_id,
            self.records.len(),
            self.rows_in,
            self.rows_dropped,
            self.duplicates_collapsed
        )
    }
}

/// One precondition probed by `check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub name: String,
    pub ok: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
}

impl CheckItem {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
            code: None,
        }
    }

    pub fn fail(name: &str, err: &gs_common::Error) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: err.to_string(),
            code: Some(err.code()),
        }
    }
}

/// Result of `check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub ok: bool,
    pub checks: Vec<CheckItem>,
}

impl CheckReport {
    pub fn new(checks: Vec<CheckItem>) -> Self {
        Self {
            ok: checks.iter().all(|c| c.ok),
            checks,
        }
    }
}

impl Render for CheckReport {
    fn render_md(&self) -> String {
        let mut out = String::from("# Preconditions\n\n");
        for c in &self.checks {
            let mark = if c.ok { "x" } else { " " };
            let _ = writeln!(out, "- [{}] **{}**: {}", mark, c.name, c.detail);
        }
        out
    }

    fn render_summary(&self) -> String {
        let failed: Vec<&str> = self
            .checks
            .iter()
            .filter(|c| !c.ok)
            .map(|c| c.name.as_str())
            .collect();
        if failed.is_empty() {
            format!("all {} checks passed", self.checks.len())
        } else {
            format!("failed: {}", failed.join(", "))
        }
    }
}
