//! guest-sync core library
//!
//! This library provides the attendee pipeline:
//! - Automation driver interface, WebDriver adapter and session artifact
//! - Event discovery across listing sections
//! - Multi-strategy export orchestration
//! - Schema-tolerant normalization into canonical records
//! - Idempotent batched sync into the remote store
//! - The bounded worker pool that ties them together
//!
//! The binary entry point is in `main.rs`.

pub mod coordinator;
pub mod discovery;
pub mod driver;
pub mod events;
pub mod exit_codes;
pub mod export;
pub mod logging;
pub mod normalize;
pub mod output;
pub mod sync;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use coordinator::{Coordinator, EventOutcome, EventStatus, RunState, RunSummary};
pub use discovery::{DiscoveryEngine, DiscoveryResult, SectionReport, SectionStatus};
pub use export::{ExportOrchestrator, ExportOutcome, ExportState};
pub use normalize::{normalize, AliasTable, NormalizedExport};
pub use sync::{SyncEngine, SyncReport};
