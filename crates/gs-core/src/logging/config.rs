//! Logging configuration.
//!
//! Resolved from CLI flags first, then `GUEST_SYNC_LOG`,
//! `GUEST_SYNC_LOG_FORMAT` and `GUEST_SYNC_LOG_TIME`, then a coarse scan of
//! `RUST_LOG`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Console lines on stderr.
    #[default]
    Human,
    /// One JSON object per line on stderr, alongside a JSON payload.
    Jsonl,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        })
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

const LEVEL_NAMES: [(LogLevel, &str); 6] = [
    (LogLevel::Trace, "trace"),
    (LogLevel::Debug, "debug"),
    (LogLevel::Info, "info"),
    (LogLevel::Warn, "warn"),
    (LogLevel::Error, "error"),
    (LogLevel::Off, "off"),
];

impl LogLevel {
    /// `-q` wins over any number of `-v`.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => LogLevel::Error,
            (false, 0) => LogLevel::Info,
            (false, 1) => LogLevel::Debug,
            (false, _) => LogLevel::Trace,
        }
    }

    pub fn as_str(self) -> &'static str {
        LEVEL_NAMES
            .iter()
            .find(|(level, _)| *level == self)
            .map(|(_, name)| *name)
            .unwrap_or("info")
    }

    /// Most verbose level named anywhere in a `RUST_LOG` directive string.
    fn scan_directives(directives: &str) -> Option<Self> {
        let lower = directives.to_ascii_lowercase();
        LEVEL_NAMES
            .iter()
            .filter(|(level, _)| *level != LogLevel::Off)
            .find(|(_, name)| lower.contains(name))
            .map(|(level, _)| *level)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let s = match s.as_str() {
            "warning" => "warn",
            "none" | "quiet" => "off",
            other => other,
        };
        LEVEL_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(level, _)| *level)
            .ok_or_else(|| format!("unknown log level {s:?}"))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Prefix human lines with a timestamp.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
        }
    }
}

impl LogConfig {
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(cli_level, cli_format, |name| std::env::var(name).ok())
    }

    fn from_lookup<F>(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_level = match lookup("GUEST_SYNC_LOG") {
            Some(value) => value.parse().ok(),
            None => lookup("RUST_LOG").and_then(|v| LogLevel::scan_directives(&v)),
        };
        let env_format = lookup("GUEST_SYNC_LOG_FORMAT").and_then(|v| v.parse().ok());
        let timestamps = lookup("GUEST_SYNC_LOG_TIME")
            .map(|v| !matches!(v.trim(), "0" | "false" | "off"))
            .unwrap_or(true);

        Self {
            level: cli_level.or(env_level).unwrap_or_default(),
            format: cli_format.or(env_format).unwrap_or_default(),
            timestamps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("quiet".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(LogLevel::from_verbosity(0, false), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(3, false), LogLevel::Trace);
        assert_eq!(LogLevel::from_verbosity(2, true), LogLevel::Error);
    }

    #[test]
    fn test_guest_sync_log_beats_rust_log() {
        let cfg = LogConfig::from_lookup(
            None,
            None,
            lookup(&[
                ("GUEST_SYNC_LOG", "warn"),
                ("RUST_LOG", "debug"),
                ("GUEST_SYNC_LOG_FORMAT", "jsonl"),
                ("GUEST_SYNC_LOG_TIME", "0"),
            ]),
        );
        assert_eq!(cfg.level, LogLevel::Warn);
        assert_eq!(cfg.format, LogFormat::Jsonl);
        assert!(!cfg.timestamps);
    }

    #[test]
    fn test_rust_log_scan_and_cli_override() {
        let cfg = LogConfig::from_lookup(None, None, lookup(&[("RUST_LOG", "ureq=warn,gs_core=trace")]));
        assert_eq!(cfg.level, LogLevel::Trace);

        let cfg = LogConfig::from_lookup(
            Some(LogLevel::Error),
            Some(LogFormat::Human),
            lookup(&[("RUST_LOG", "debug"), ("GUEST_SYNC_LOG_FORMAT", "jsonl")]),
        );
        assert_eq!(cfg, LogConfig {
            level: LogLevel::Error,
            format: LogFormat::Human,
            timestamps: true,
        });
    }
}
