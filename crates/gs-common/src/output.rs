//! Output format selection.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How a command renders its stdout payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Envelope with schema version, command and run id
    #[default]
    Json,
    /// Markdown report
    Md,
    /// Single line, e.g. `12 events: 11 succeeded, 1 failed`
    Summary,
    /// Nothing on stdout; read the exit code
    Exitcode,
}

impl OutputFormat {
    /// JSON payloads pair with JSONL logs and progress events on stderr.
    pub fn is_machine(self) -> bool {
        self == OutputFormat::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_names() {
        assert_eq!(OutputFormat::from_str("md", true).unwrap(), OutputFormat::Md);
        assert_eq!(
            OutputFormat::from_str("exitcode", true).unwrap(),
            OutputFormat::Exitcode
        );
        assert!(OutputFormat::Json.is_machine());
        assert!(!OutputFormat::Summary.is_machine());
    }
}
