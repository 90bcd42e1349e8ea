//! guest-sync configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the `platform`, `export`, `sync` and `run` sections
//! - Config resolution (CLI → env → XDG → defaults) across TOML, YAML and JSON
//! - Semantic validation
//! - Config snapshots for run summaries

pub mod resolve;
pub mod settings;
pub mod snapshot;
pub mod validate;

pub use resolve::{load_config, ConfigError, ConfigOptions, ConfigSource, ResolvedConfig};
pub use settings::{
    ExportMode, ExportSettings, GuestSyncConfig, PlatformSettings, RunSettings, SectionSettings,
    SyncSettings, EVENT_PLACEHOLDER,
};
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_config, ValidationError, ValidationResult, MAX_BATCH_SIZE};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
