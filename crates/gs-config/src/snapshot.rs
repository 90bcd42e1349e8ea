//! Configuration snapshots for run summaries and reproducibility.
//!
//! A snapshot captures which configuration a run used, so a run summary can be
//! tied back to the exact file (by hash) that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolve::{hash_content, ResolvedConfig};
use crate::settings::ExportMode;

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// Schema version of the configuration.
    pub schema_version: String,

    /// Path the config was loaded from.
    #[serde(default)]
    pub path: Option<String>,

    /// Source of the configuration.
    pub source: String,

    /// SHA-256 of the file content, or of the literal "defaults".
    pub hash: String,

    /// Environment variables that overrode file values (names only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_overrides: Vec<String>,

    /// Key configuration values for quick reference.
    pub summary: ConfigSummary,
}

/// Summary of key configuration values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub mode: ExportMode,
    pub workers: usize,
    pub batch_size: usize,
    pub store_configured: bool,
    pub fallback_templates: usize,
    pub sections: Vec<String>,
}

impl ConfigSnapshot {
    /// Create a new snapshot from a resolved configuration.
    pub fn new(resolved: &ResolvedConfig) -> Self {
        let cfg = &resolved.config;
        ConfigSnapshot {
            timestamp: Utc::now(),
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            path: resolved.path.as_ref().map(|p| p.display().to_string()),
            source: resolved.source.to_string(),
            hash: resolved
                .hash
                .clone()
                .unwrap_or_else(|| hash_content("defaults")),
            env_overrides: resolved.env_overrides.clone(),
            summary: ConfigSummary {
                mode: cfg.export.mode,
                workers: cfg.run.workers,
                batch_size: cfg.sync.batch_size,
                store_configured: cfg.sync.has_credentials(),
                fallback_templates: cfg.platform.fallback_templates.len(),
                sections: cfg.platform.sections.iter().map(|s| s.name.clone()).collect(),
            },
        }
    }

    /// Check if this snapshot matches another (same config content).
    pub fn matches(&self, other: &ConfigSnapshot) -> bool {
        self.hash == other.hash
    }

    /// Get a short identifier for this snapshot (first 12 chars of hash).
    pub fn short_id(&self) -> &str {
        &self.hash[..12.min(self.hash.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{load_from, ConfigSource};

    #[test]
    fn test_defaults_snapshot() {
        let resolved = load_from(None, None, None).unwrap();
        let snap = ConfigSnapshot::new(&resolved);
        assert_eq!(snap.source, ConfigSource::BuiltinDefault.to_string());
        assert_eq!(snap.short_id().len(), 12);
        assert_eq!(snap.summary.workers, 4);
        assert!(!snap.summary.store_configured);
        assert_eq!(snap.summary.sections, vec!["hosting", "past"]);
    }

    #[test]
    fn test_snapshot_tracks_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.toml");
        let b = dir.path().join("b.toml");
        std::fs::write(&a, "[sync]\nbatch_size = 100\n").unwrap();
        std::fs::write(&b, "[sync]\nbatch_size = 200\n").unwrap();

        let snap_a = ConfigSnapshot::new(&load_from(Some(&a), None, None).unwrap());
        let snap_a2 = ConfigSnapshot::new(&load_from(Some(&a), None, None).unwrap());
        let snap_b = ConfigSnapshot::new(&load_from(Some(&b), None, None).unwrap());

        assert!(snap_a.matches(&snap_a2));
        assert!(!snap_a.matches(&snap_b));
        assert_eq!(snap_b.summary.batch_size, 200);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = ConfigSnapshot::new(&load_from(None, None, None).unwrap());
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["summary"]["mode"], "ui-first");
        assert!(json.get("env_overrides").is_none());
    }
}
