//! Configuration resolution, parsing, and environment overrides.
//!
//! Resolution order: CLI argument → environment variable → XDG path → defaults.

use crate::settings::GuestSyncConfig;
use crate::validate::{validate_config, ValidationError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_PATH: &str = "GUEST_SYNC_CONFIG";

/// Store URL, preferred name then the hosted-store name.
pub const ENV_STORE_URL: [&str; 2] = ["GUEST_SYNC_STORE_URL", "SUPABASE_URL"];

/// Store key, preferred name then the hosted-store name.
pub const ENV_STORE_KEY: [&str; 2] = ["GUEST_SYNC_STORE_KEY", "SUPABASE_SERVICE_ROLE_KEY"];

/// Application name for XDG directories.
const APP_NAME: &str = "guest-sync";

const CONFIG_FILENAME: &str = "config.toml";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid config in {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

/// Detect the config format from the file extension.
pub fn detect_format(path: &Path) -> Result<ConfigFormat, ConfigError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "toml" => Ok(ConfigFormat::Toml),
        "yaml" | "yml" => Ok(ConfigFormat::Yaml),
        "json" => Ok(ConfigFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext)),
    }
}

/// Parse configuration content in the given format.
pub fn parse_config(
    content: &str,
    format: ConfigFormat,
    path: &Path,
) -> Result<GuestSyncConfig, ConfigError> {
    let parsed = match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::ParseError {
        path: path.to_path_buf(),
        message,
    })
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file path (highest priority).
    pub config_path: Option<PathBuf>,
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: GuestSyncConfig,
    /// Path the config was read from (None when using defaults).
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
    /// SHA-256 hash of the file content (None when using defaults).
    pub hash: Option<String>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<String>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit CLI path (via ConfigOptions)
/// 2. `GUEST_SYNC_CONFIG`
/// 3. `$XDG_CONFIG_HOME/guest-sync/config.toml`
/// 4. Built-in defaults
///
/// Secrets are then overridden from the environment and the result is
/// validated semantically.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let env_path = std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from);
    let xdg_path = dirs::config_dir().map(|d| d.join(APP_NAME).join(CONFIG_FILENAME));
    let mut resolved = load_from(
        options.config_path.as_deref(),
        env_path.as_deref(),
        xdg_path.as_deref(),
    )?;

    resolved.env_overrides = apply_env_overrides(&mut resolved.config, |name| {
        std::env::var(name).ok()
    });

    validate_config(&resolved.config)?;
    Ok(resolved)
}

/// Resolve and parse without touching the process environment.
pub fn load_from(
    cli_path: Option<&Path>,
    env_path: Option<&Path>,
    xdg_path: Option<&Path>,
) -> Result<ResolvedConfig, ConfigError> {
    let (path, source) = if let Some(path) = cli_path {
        (Some(path.to_path_buf()), ConfigSource::CliArgument)
    } else if let Some(path) = env_path {
        (Some(path.to_path_buf()), ConfigSource::Environment)
    } else if let Some(path) = xdg_path.filter(|p| p.exists()) {
        (Some(path.to_path_buf()), ConfigSource::XdgConfig)
    } else {
        (None, ConfigSource::BuiltinDefault)
    };

    let Some(path) = path else {
        return Ok(ResolvedConfig {
            config: GuestSyncConfig::default(),
            path: None,
            source,
            hash: None,
            env_overrides: Vec::new(),
        });
    };

    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
        path: path.clone(),
        source: e,
    })?;
    let format = detect_format(&path)?;
    let config = parse_config(&content, format, &path)?;

    Ok(ResolvedConfig {
        config,
        hash: Some(hash_content(&content)),
        path: Some(path),
        source,
        env_overrides: Vec::new(),
    })
}

/// Override store credentials from the environment.
///
/// Returns the names of the variables that were applied.
pub fn apply_env_overrides<F>(config: &mut GuestSyncConfig, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();
    let first_set = |names: &[&str]| {
        names.iter().find_map(|name| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (name.to_string(), v))
        })
    };

    if let Some((name, value)) = first_set(&ENV_STORE_URL) {
        config.sync.url = Some(value);
        applied.push(name);
    }
    if let Some((name, value)) = first_set(&ENV_STORE_KEY) {
        config.sync.key = Some(value);
        applied.push(name);
    }
    applied
}

/// Get the XDG config directory for guest-sync.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Compute SHA-256 hash of content.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(
            format!("{}", ConfigSource::Environment),
            "environment variable"
        );
        assert_eq!(format!("{}", ConfigSource::XdgConfig), "XDG config");
        assert_eq!(
            format!("{}", ConfigSource::BuiltinDefault),
            "builtin default"
        );
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(Path::new("c.toml")).unwrap(),
            ConfigFormat::Toml
        );
        assert_eq!(
            detect_format(Path::new("c.YML")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            detect_format(Path::new("c.json")).unwrap(),
            ConfigFormat::Json
        );
        assert!(detect_format(Path::new("c.ini")).is_err());
    }

    #[test]
    fn test_defaults_when_nothing_found() {
        let resolved = load_from(None, None, Some(Path::new("/nonexistent/gs.toml"))).unwrap();
        assert_eq!(resolved.source, ConfigSource::BuiltinDefault);
        assert!(resolved.path.is_none());
        assert_eq!(resolved.config, GuestSyncConfig::default());
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let err = load_from(Some(Path::new("/nonexistent/gs.toml")), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_cli_path_wins_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("cli.toml");
        let env = dir.path().join("env.yaml");
        std::fs::write(&cli, "[run]\nworkers = 2\n").unwrap();
        std::fs::write(&env, "run:\n  workers: 9\n").unwrap();

        let resolved = load_from(Some(&cli), Some(&env), None).unwrap();
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert_eq!(resolved.config.run.workers, 2);
        assert_eq!(resolved.hash.as_deref().map(str::len), Some(64));

        let resolved = load_from(None, Some(&env), None).unwrap();
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.config.run.workers, 9);
    }

    #[test]
    fn test_parse_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_from(Some(&path), None, None).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_env_overrides_prefer_primary_names() {
        let env: HashMap<&str, &str> = [
            ("GUEST_SYNC_STORE_URL", "https://primary.example"),
            ("SUPABASE_URL", "https://secondary.example"),
            ("SUPABASE_SERVICE_ROLE_KEY", "k"),
        ]
        .into_iter()
        .collect();
        let mut cfg = GuestSyncConfig::default();
        let applied = apply_env_overrides(&mut cfg, |name| env.get(name).map(|v| v.to_string()));
        assert_eq!(cfg.sync.url.as_deref(), Some("https://primary.example"));
        assert_eq!(cfg.sync.key.as_deref(), Some("k"));
        assert_eq!(
            applied,
            vec!["GUEST_SYNC_STORE_URL", "SUPABASE_SERVICE_ROLE_KEY"]
        );
    }

    #[test]
    fn test_blank_env_value_ignored() {
        let mut cfg = GuestSyncConfig::default();
        cfg.sync.url = Some("https://file.example".into());
        let applied = apply_env_overrides(&mut cfg, |name| {
            (name == "GUEST_SYNC_STORE_URL").then(|| "   ".to_string())
        });
        assert!(applied.is_empty());
        assert_eq!(cfg.sync.url.as_deref(), Some("https://file.example"));
    }
}
