//! Typed configuration sections.
//!
//! Every field has a built-in default so that an empty file (or no file at
//! all) yields a usable configuration. Platform labels and URL templates live
//! here rather than in the pipeline code.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder substituted with the event id in URL templates.
pub const EVENT_PLACEHOLDER: &str = "{EVENT}";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestSyncConfig {
    pub platform: PlatformSettings,
    pub export: ExportSettings,
    pub sync: SyncSettings,
    pub run: RunSettings,
}

impl GuestSyncConfig {
    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.sync.key.is_some() {
            copy.sync.key = Some("[REDACTED]".to_string());
        }
        copy
    }
}

/// One listing section on the profile page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSettings {
    /// Name used in reports and logs ("hosting", "past").
    pub name: String,
    /// Which occurrence of the listing control opens this section (0-based).
    pub index: usize,
}

/// Hosting platform profile: URLs, labels, and identifier pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub base_url: String,
    /// Account profile page holding the listing sections.
    pub profile_url: Option<String>,
    pub event_id_pattern: String,
    pub sections: Vec<SectionSettings>,
    /// Visible label of the control that opens a full section listing.
    pub listing_label: String,
    /// Per-event management surface, with `{EVENT}`.
    pub manage_url: String,
    /// Labels of the guest subview tab, tried in order.
    pub guest_tab_labels: Vec<String>,
    /// Labels of the export control, tried in order.
    pub export_labels: Vec<String>,
    /// Direct-fetch URL templates tried after any learned template.
    pub fallback_templates: Vec<String>,
    pub user_agent: String,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        let base = "https://luma.com";
        Self {
            base_url: base.to_string(),
            profile_url: None,
            event_id_pattern: r"evt-[A-Za-z0-9_-]+".to_string(),
            sections: vec![
                SectionSettings {
                    name: "hosting".to_string(),
                    index: 0,
                },
                SectionSettings {
                    name: "past".to_string(),
                    index: 1,
                },
            ],
            listing_label: "View All".to_string(),
            manage_url: format!("{base}/event/manage/{EVENT_PLACEHOLDER}"),
            guest_tab_labels: vec!["Guests".to_string()],
            export_labels: vec!["Download as CSV".to_string(), "Export".to_string()],
            fallback_templates: vec![
                format!("{base}/api/event/{EVENT_PLACEHOLDER}/guests/export"),
                format!("{base}/event/manage/{EVENT_PLACEHOLDER}/guests/export"),
                format!("{base}/event/{EVENT_PLACEHOLDER}/guests/export"),
                format!("{base}/api/v1/event/{EVENT_PLACEHOLDER}/guests/export"),
            ],
            user_agent: concat!("guest-sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PlatformSettings {
    /// Host part of `base_url`, used to match session cookies.
    pub fn host(&self) -> Option<&str> {
        let rest = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        let host = rest.split(['/', '?', '#']).next().unwrap_or("");
        let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
        let host = host.split(':').next().unwrap_or("");
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}

/// How export strategies are applied across events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    /// UI export then direct fetch for every event.
    #[default]
    UiFirst,
    /// UI export for the first event only; direct fetch for the rest.
    Probe,
    /// Direct fetch only.
    Direct,
}

impl std::fmt::Display for ExportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportMode::UiFirst => write!(f, "ui-first"),
            ExportMode::Probe => write!(f, "probe"),
            ExportMode::Direct => write!(f, "direct"),
        }
    }
}

/// Export orchestration and discovery timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub mode: ExportMode,
    pub navigation_timeout_secs: u64,
    pub selector_timeout_secs: u64,
    pub tab_timeout_secs: u64,
    pub capture_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub ui_attempts: u32,
    pub retry_backoff_ms: u64,
    pub fetch_attempts: u32,
    /// Pause after opening a listing or subview so it can render.
    pub settle_ms: u64,
    pub scroll_pause_ms: u64,
    pub stable_probes: u32,
    pub max_scroll_attempts: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            mode: ExportMode::UiFirst,
            navigation_timeout_secs: 60,
            selector_timeout_secs: 30,
            tab_timeout_secs: 15,
            capture_timeout_secs: 60,
            fetch_timeout_secs: 60,
            ui_attempts: 3,
            retry_backoff_ms: 2_000,
            fetch_attempts: 1,
            settle_ms: 1_200,
            scroll_pause_ms: 300,
            stable_probes: 2,
            max_scroll_attempts: 30,
        }
    }
}

impl ExportSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }

    pub fn tab_timeout(&self) -> Duration {
        Duration::from_secs(self.tab_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }
}

/// Remote store connection and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub url: Option<String>,
    pub key: Option<String>,
    pub table: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            table: "attendees".to_string(),
            batch_size: 500,
            timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Both url and key present and non-blank.
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.url) && present(&self.key)
    }
}

/// Local run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub workers: usize,
    pub output_dir: PathBuf,
    pub session_path: PathBuf,
    pub webdriver_url: String,
    pub headless: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            output_dir: PathBuf::from("downloads"),
            session_path: PathBuf::from("storageState.json"),
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
        }
    }
}
