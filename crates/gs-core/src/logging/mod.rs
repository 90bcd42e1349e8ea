//! Logging for sync runs.
//!
//! Console lines for people, JSONL for machines; both on stderr so stdout
//! stays a clean command payload. Every event is emitted through
//! [`log_event!`] with the run's [`LogContext`]. Attendee emails and
//! credentials never reach the JSONL sink in clear text.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::{hash_identity, redact_field, JsonlLayer};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Later calls are ignored.
///
/// Event targets are dotted event names (`export.saved`), so the filter is a
/// bare level unless `RUST_LOG` supplies directives of its own.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    let _ = match config.format {
        LogFormat::Jsonl => registry.with(JsonlLayer::stderr()).try_init(),
        LogFormat::Human => {
            let console = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                registry.with(console).try_init()
            } else {
                registry.with(console.without_time()).try_init()
            }
        }
    };
}

/// Short stable identifier for this machine, `host-` plus eight hex digits.
///
/// Derived from `/etc/machine-id` or `$HOSTNAME`, hashed so neither leaks
/// into logs; random when neither is available.
pub fn get_host_id() -> String {
    let seed = std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()));

    let digest = match seed {
        Some(seed) => hash_identity(&seed),
        None => uuid::Uuid::new_v4().simple().to_string(),
    };
    format!("host-{}", &digest[..8])
}

/// Emit one structured event carrying the run context.
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::EXPORT_SAVED, Stage::Export, "Saved export");
/// log_event!(ctx, DEBUG, event_names::EXPORT_ATTEMPT, Stage::Export, "Attempt done",
///     strategy = "ui", outcome = "timeout");
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, $level:ident, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::event!(
            target: $event,
            tracing::Level::$level,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            event_id = %$ctx.event_id_str(),
            stage = %$stage,
            message = %$msg,
            $($key = $val,)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_id_shape_is_stable() {
        let host_id = get_host_id();
        assert!(host_id.starts_with("host-"));
        assert_eq!(host_id.len(), 13);
        assert!(host_id[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_log_event_macro_compiles_with_fields() {
        let ctx = LogContext::new("gs-run", "host-1").for_event("evt-1");
        crate::log_event!(
            ctx,
            DEBUG,
            event_names::EXPORT_ATTEMPT,
            Stage::Export,
            "attempt",
            strategy = "ui",
            attempt = 2u32
        );
    }
}
