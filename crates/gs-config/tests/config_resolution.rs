//! End-to-end configuration resolution tests against the real process
//! environment.
//!
//! Covers:
//! - Resolution order (CLI > GUEST_SYNC_CONFIG > XDG > defaults)
//! - Secret overrides from the environment
//! - Validation failures surfacing through `load_config`

use gs_config::{load_config, ConfigError, ConfigOptions, ConfigSource, ExportMode};
use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const KEYS: &[&str] = &[
    "GUEST_SYNC_CONFIG",
    "GUEST_SYNC_STORE_URL",
    "GUEST_SYNC_STORE_KEY",
    "SUPABASE_URL",
    "SUPABASE_SERVICE_ROLE_KEY",
    "XDG_CONFIG_HOME",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|k| (k.to_string(), env::var(k).ok()))
            .collect();
        for key in keys {
            env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, val) in &self.saved {
            match val {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

#[test]
fn test_xdg_config_is_found() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(KEYS);
        let xdg = TempDir::new().expect("tempdir");
        let dir = xdg.path().join("guest-sync");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("config.toml"), "[export]\nmode = \"probe\"\n").expect("write");
        env::set_var("XDG_CONFIG_HOME", xdg.path());

        let resolved = load_config(&ConfigOptions::default()).expect("load");
        assert_eq!(resolved.source, ConfigSource::XdgConfig);
        assert_eq!(resolved.config.export.mode, ExportMode::Probe);
    });
}

#[test]
fn test_env_config_beats_xdg_and_cli_beats_env() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(KEYS);
        let tmp = TempDir::new().expect("tempdir");
        let env_file = tmp.path().join("env.json");
        let cli_file = tmp.path().join("cli.yaml");
        fs::write(&env_file, r#"{"run": {"workers": 7}}"#).expect("write");
        fs::write(&cli_file, "run:\n  workers: 3\n").expect("write");
        env::set_var("GUEST_SYNC_CONFIG", &env_file);

        let resolved = load_config(&ConfigOptions::default()).expect("load env");
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.config.run.workers, 7);

        let resolved = load_config(&ConfigOptions {
            config_path: Some(cli_file),
        })
        .expect("load cli");
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert_eq!(resolved.config.run.workers, 3);
    });
}

#[test]
fn test_store_secrets_from_environment() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(KEYS);
        let tmp = TempDir::new().expect("tempdir");
        env::set_var("XDG_CONFIG_HOME", tmp.path());
        env::set_var("SUPABASE_URL", "https://proj.example.co");
        env::set_var("SUPABASE_SERVICE_ROLE_KEY", "service-key");

        let resolved = load_config(&ConfigOptions::default()).expect("load");
        assert_eq!(resolved.source, ConfigSource::BuiltinDefault);
        assert!(resolved.config.sync.has_credentials());
        assert_eq!(
            resolved.env_overrides,
            vec!["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"]
        );
    });
}

#[test]
fn test_invalid_values_fail_validation() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(KEYS);
        let tmp = TempDir::new().expect("tempdir");
        let file = tmp.path().join("bad.toml");
        fs::write(&file, "[sync]\nbatch_size = 5000\n").expect("write");

        let err = load_config(&ConfigOptions {
            config_path: Some(file),
        })
        .expect_err("batch size over limit");
        assert!(matches!(err, ConfigError::ValidationError(_)));
    });
}

#[test]
fn test_unknown_extension_rejected() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(KEYS);
        let tmp = TempDir::new().expect("tempdir");
        let file = tmp.path().join("config.ini");
        fs::write(&file, "workers=2").expect("write");

        let err = load_config(&ConfigOptions {
            config_path: Some(file),
        })
        .expect_err("ini unsupported");
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    });
}
