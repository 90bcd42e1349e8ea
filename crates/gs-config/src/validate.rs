//! Configuration validation errors and semantic validation.

use crate::settings::{GuestSyncConfig, EVENT_PLACEHOLDER};
use thiserror::Error;

/// Upper bound on records per store request.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid pattern for {field}: {message}")]
    InvalidPattern { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::MissingField(_) => 64,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::InvalidPattern { .. } => 66,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a configuration semantically, stopping at the first problem.
pub fn validate_config(config: &GuestSyncConfig) -> ValidationResult<()> {
    validate_platform(config)?;
    validate_export(config)?;
    validate_sync(config)?;
    validate_run(config)?;
    Ok(())
}

fn validate_platform(config: &GuestSyncConfig) -> ValidationResult<()> {
    let p = &config.platform;

    if p.host().is_none() {
        return Err(ValidationError::invalid(
            "platform.base_url",
            format!("no host in {:?}", p.base_url),
        ));
    }

    if let Err(e) = regex::Regex::new(&p.event_id_pattern) {
        return Err(ValidationError::InvalidPattern {
            field: "platform.event_id_pattern".to_string(),
            message: e.to_string(),
        });
    }

    if p.listing_label.trim().is_empty() {
        return Err(ValidationError::MissingField(
            "platform.listing_label".to_string(),
        ));
    }

    if !p.manage_url.contains(EVENT_PLACEHOLDER) {
        return Err(ValidationError::invalid(
            "platform.manage_url",
            format!("must contain {EVENT_PLACEHOLDER}"),
        ));
    }

    for (i, template) in p.fallback_templates.iter().enumerate() {
        if !template.contains(EVENT_PLACEHOLDER) {
            return Err(ValidationError::invalid(
                &format!("platform.fallback_templates[{i}]"),
                format!("must contain {EVENT_PLACEHOLDER}"),
            ));
        }
    }

    if p.export_labels.iter().all(|l| l.trim().is_empty()) {
        return Err(ValidationError::MissingField(
            "platform.export_labels".to_string(),
        ));
    }

    if p.guest_tab_labels.iter().all(|l| l.trim().is_empty()) {
        return Err(ValidationError::MissingField(
            "platform.guest_tab_labels".to_string(),
        ));
    }

    let mut names: Vec<&str> = p.sections.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != p.sections.len() {
        return Err(ValidationError::invalid(
            "platform.sections",
            "section names must be unique",
        ));
    }

    Ok(())
}

fn validate_export(config: &GuestSyncConfig) -> ValidationResult<()> {
    let e = &config.export;

    let timeouts = [
        ("export.navigation_timeout_secs", e.navigation_timeout_secs),
        ("export.selector_timeout_secs", e.selector_timeout_secs),
        ("export.tab_timeout_secs", e.tab_timeout_secs),
        ("export.capture_timeout_secs", e.capture_timeout_secs),
        ("export.fetch_timeout_secs", e.fetch_timeout_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            return Err(ValidationError::invalid(field, "timeout must be positive"));
        }
    }

    if e.ui_attempts == 0 {
        return Err(ValidationError::invalid(
            "export.ui_attempts",
            "must be at least 1",
        ));
    }
    if e.fetch_attempts == 0 {
        return Err(ValidationError::invalid(
            "export.fetch_attempts",
            "must be at least 1",
        ));
    }
    if e.stable_probes == 0 {
        return Err(ValidationError::invalid(
            "export.stable_probes",
            "must be at least 1",
        ));
    }
    if e.max_scroll_attempts == 0 {
        return Err(ValidationError::invalid(
            "export.max_scroll_attempts",
            "must be at least 1",
        ));
    }

    Ok(())
}

fn validate_sync(config: &GuestSyncConfig) -> ValidationResult<()> {
    let s = &config.sync;

    if s.batch_size == 0 || s.batch_size > MAX_BATCH_SIZE {
        return Err(ValidationError::invalid(
            "sync.batch_size",
            format!("must be in 1..={MAX_BATCH_SIZE}, got {}", s.batch_size),
        ));
    }

    if s.timeout_secs == 0 {
        return Err(ValidationError::invalid(
            "sync.timeout_secs",
            "timeout must be positive",
        ));
    }

    if s.table.trim().is_empty() {
        return Err(ValidationError::MissingField("sync.table".to_string()));
    }

    if let Some(url) = s.url.as_deref() {
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ValidationError::invalid(
                "sync.url",
                "must be an http(s) URL",
            ));
        }
    }

    Ok(())
}

fn validate_run(config: &GuestSyncConfig) -> ValidationResult<()> {
    if config.run.workers == 0 {
        return Err(ValidationError::invalid("run.workers", "must be at least 1"));
    }
    if config.run.output_dir.as_os_str().is_empty() {
        return Err(ValidationError::MissingField("run.output_dir".to_string()));
    }
    Ok(())
}
