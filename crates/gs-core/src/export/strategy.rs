//! Export strategies.
//!
//! Each strategy is one way of obtaining an event's attendee export. The
//! orchestrator tries them in order; every strategy reports every attempt
//! it made, successful or not.

use super::fetch::HttpFetcher;
use super::retry::{retry, AttemptFailure};
use super::template::{candidate_urls, render, LearnedTemplate};
use super::validate::validate_body;
use super::{ExportState, ExportTracker};
use crate::driver::{cookie_header, BoxedDriver, DriverError, Locator};
use crate::logging::{event_names, Stage};
use gs_common::{AttemptOutcome, EventId, ExportAttempt, RawExport, StrategyKind};
use gs_config::{ExportSettings, PlatformSettings};
use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between element probes while waiting for one of several locators.
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

const ACCEPT_HEADER: &str = "text/csv,application/csv,*/*;q=0.1";

/// What a strategy produced for one event.
#[derive(Debug, Default)]
pub struct StrategyResult {
    pub export: Option<RawExport>,
    pub attempts: Vec<ExportAttempt>,
}

/// One method of obtaining an event's raw export.
pub trait ExportStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether this strategy needs a browsing context.
    fn needs_driver(&self) -> bool {
        false
    }

    fn attempt(
        &self,
        event_id: &EventId,
        driver: Option<&mut BoxedDriver>,
        tracker: &mut ExportTracker,
    ) -> StrategyResult;
}

fn driver_failure(err: DriverError) -> AttemptFailure {
    if err.is_timeout() {
        AttemptFailure::timeout(err.to_string())
    } else {
        AttemptFailure::rejected(err.to_string())
    }
}

fn record(
    event_id: &EventId,
    kind: StrategyKind,
    failures: Vec<AttemptFailure>,
) -> Vec<ExportAttempt> {
    failures
        .into_iter()
        .map(|f| ExportAttempt::new(event_id, kind, f.outcome).with_detail(f.detail))
        .collect()
}

/// Poll several locators until one has a visible match.
fn wait_for_any(
    driver: &mut BoxedDriver,
    locators: &[Locator],
    timeout: Duration,
) -> Result<Option<Locator>, DriverError> {
    let deadline = Instant::now() + timeout;
    loop {
        for locator in locators {
            if driver.locate(locator)? > 0 {
                return Ok(Some(locator.clone()));
            }
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        driver.pause(PROBE_INTERVAL);
    }
}

/// UI-trigger strategy: open the event's management surface, switch to the
/// guest subview and capture what the export control produces.
pub struct UiStrategy {
    manage_url: String,
    tab_locators: Vec<Locator>,
    export_locators: Vec<Locator>,
    settings: ExportSettings,
    learned: Arc<LearnedTemplate>,
}

impl UiStrategy {
    pub fn new(
        platform: &PlatformSettings,
        settings: &ExportSettings,
        learned: Arc<LearnedTemplate>,
    ) -> Self {
        let tab_locators = platform
            .guest_tab_labels
            .iter()
            .flat_map(|label| [Locator::role("tab", label.as_str()), Locator::text(label.as_str())])
            .collect();
        let export_locators = platform
            .export_labels
            .iter()
            .map(|label| Locator::text(label.as_str()))
            .collect();
        Self {
            manage_url: platform.manage_url.clone(),
            tab_locators,
            export_locators,
            settings: settings.clone(),
            learned,
        }
    }

    fn run_once(
        &self,
        event_id: &EventId,
        driver: &mut BoxedDriver,
        tracker: &mut ExportTracker,
    ) -> Result<RawExport, AttemptFailure> {
        let url = render(&self.manage_url, event_id);
        tracker.advance(ExportState::NavigatingToTarget);
        driver
            .navigate(&url, self.settings.navigation_timeout())
            .map_err(driver_failure)?;
        let event_title = driver.title().unwrap_or(None);

        tracker.advance(ExportState::AwaitingExportSurface);
        let tab = wait_for_any(driver, &self.tab_locators, self.settings.tab_timeout())
            .map_err(driver_failure)?
            .ok_or_else(|| AttemptFailure::timeout("guest subview did not appear"))?;
        driver.trigger(&tab, 0).map_err(driver_failure)?;
        driver.pause(self.settings.settle());

        let control = wait_for_any(
            driver,
            &self.export_locators,
            self.settings.selector_timeout(),
        )
        .map_err(driver_failure)?
        .ok_or_else(|| AttemptFailure::timeout("export control did not appear"))?;

        tracker.advance(ExportState::Triggering);
        tracker.advance(ExportState::CapturingStream);
        let timeout = self.settings.capture_timeout();
        let stream = driver
            .capture_on_trigger(&control, timeout)
            .map_err(driver_failure)?
            .ok_or_else(|| {
                AttemptFailure::timeout(format!("no export captured within {:?}", timeout))
            })?;

        tracker.advance(ExportState::Validating);
        let kind = validate_body(
            &stream.bytes,
            stream.content_type.as_deref(),
            stream.content_disposition.as_deref(),
        )
        .map_err(|r| AttemptFailure::rejected(r.to_string()))?;

        if let Some(observed) = stream.url.as_deref() {
            if let Some(template) = self.learned.learn(observed, event_id) {
                crate::log_event!(
                    tracker.log(),
                    INFO,
                    event_names::EXPORT_TEMPLATE_LEARNED,
                    Stage::Export,
                    "Learned direct export template",
                    template = template
                );
            }
        }

        Ok(RawExport {
            event_id: event_id.clone(),
            bytes: stream.bytes,
            kind,
            source_url: stream.url,
            event_title,
        })
    }
}

impl ExportStrategy for UiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ui
    }

    fn needs_driver(&self) -> bool {
        true
    }

    fn attempt(
        &self,
        event_id: &EventId,
        driver: Option<&mut BoxedDriver>,
        tracker: &mut ExportTracker,
    ) -> StrategyResult {
        let Some(driver) = driver else {
            return StrategyResult {
                export: None,
                attempts: vec![ExportAttempt::new(
                    event_id,
                    StrategyKind::Ui,
                    AttemptOutcome::Rejected,
                )
                .with_detail("no browsing context")],
            };
        };

        // `pause` and `action` both need the driver; route the backoff
        // through a flag and sleep inside the next attempt instead.
        let backoff = self.settings.retry_backoff();
        let pending_pause = Cell::new(false);
        let retried = retry(
            self.settings.ui_attempts,
            backoff,
            |_| pending_pause.set(true),
            |attempt| {
                if pending_pause.replace(false) {
                    driver.pause(backoff);
                }
                crate::log_event!(
                    tracker.log(),
                    DEBUG,
                    event_names::EXPORT_ATTEMPT,
                    Stage::Export,
                    "UI export attempt",
                    strategy = "ui",
                    attempt = attempt
                );
                self.run_once(event_id, driver, tracker)
            },
        );

        let mut attempts = record(event_id, StrategyKind::Ui, retried.failures);
        if let Some(export) = &retried.value {
            let mut success = ExportAttempt::new(event_id, StrategyKind::Ui, AttemptOutcome::Success);
            if let Some(url) = &export.source_url {
                success = success.with_detail(url.clone());
            }
            attempts.push(success);
        }
        StrategyResult {
            export: retried.value,
            attempts,
        }
    }
}

/// Direct-fetch strategy: GET candidate export URLs with the session's
/// cookies.
pub struct DirectFetchStrategy {
    fetcher: Arc<dyn HttpFetcher>,
    fallback_templates: Vec<String>,
    user_agent: String,
    host: String,
    cookie_header: String,
    settings: ExportSettings,
    learned: Arc<LearnedTemplate>,
}

impl DirectFetchStrategy {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        platform: &PlatformSettings,
        settings: &ExportSettings,
        cookie_header: impl Into<String>,
        learned: Arc<LearnedTemplate>,
    ) -> Self {
        Self {
            fetcher,
            fallback_templates: platform.fallback_templates.clone(),
            user_agent: platform.user_agent.clone(),
            host: platform.host().unwrap_or_default().to_string(),
            cookie_header: cookie_header.into(),
            settings: settings.clone(),
            learned,
        }
    }

    /// Prefer the live context's cookies; fall back to the session artifact's.
    fn cookies_for(&self, driver: Option<&mut BoxedDriver>) -> String {
        let live = driver
            .and_then(|d| d.cookies().ok())
            .map(|cookies| {
                let now = chrono::Utc::now().timestamp() as f64;
                cookie_header(&cookies, &self.host, now)
            })
            .filter(|header| !header.is_empty());
        live.unwrap_or_else(|| self.cookie_header.clone())
    }

    fn fetch_once(
        &self,
        event_id: &EventId,
        url: &str,
        cookies: &str,
        tracker: &mut ExportTracker,
    ) -> Result<RawExport, AttemptFailure> {
        tracker.advance(ExportState::NavigatingToTarget);
        let mut headers = vec![
            ("accept", ACCEPT_HEADER),
            ("user-agent", self.user_agent.as_str()),
        ];
        if !cookies.is_empty() {
            headers.push(("cookie", cookies));
        }

        tracker.advance(ExportState::Triggering);
        let response = self
            .fetcher
            .get(url, &headers, self.settings.fetch_timeout())
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptFailure::timeout(e.to_string())
                } else {
                    AttemptFailure::rejected(e.to_string())
                }
            })?;

        tracker.advance(ExportState::CapturingStream);
        if !response.is_success() {
            return Err(AttemptFailure::rejected(format!(
                "HTTP {} from {}",
                response.status, url
            )));
        }

        tracker.advance(ExportState::Validating);
        let kind = validate_body(
            &response.body,
            response.content_type.as_deref(),
            response.content_disposition.as_deref(),
        )
        .map_err(|r| AttemptFailure::rejected(format!("{} from {}", r, url)))?;

        Ok(RawExport {
            event_id: event_id.clone(),
            bytes: response.body,
            kind,
            source_url: Some(url.to_string()),
            event_title: None,
        })
    }
}

impl ExportStrategy for DirectFetchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectFetch
    }

    fn attempt(
        &self,
        event_id: &EventId,
        driver: Option<&mut BoxedDriver>,
        tracker: &mut ExportTracker,
    ) -> StrategyResult {
        let cookies = self.cookies_for(driver);
        let urls = candidate_urls(self.learned.get(), &self.fallback_templates, event_id);
        let mut attempts = Vec::new();

        for url in urls {
            let retried = retry(
                self.settings.fetch_attempts,
                self.settings.retry_backoff(),
                std::thread::sleep,
                |attempt| {
                    crate::log_event!(
                        tracker.log(),
                        DEBUG,
                        event_names::EXPORT_ATTEMPT,
                        Stage::Export,
                        "Direct fetch attempt",
                        strategy = "direct_fetch",
                        url = url.as_str(),
                        attempt = attempt
                    );
                    self.fetch_once(event_id, &url, &cookies, tracker)
                },
            );
            attempts.extend(record(event_id, StrategyKind::DirectFetch, retried.failures));
            if let Some(export) = retried.value {
                attempts.push(
                    ExportAttempt::new(event_id, StrategyKind::DirectFetch, AttemptOutcome::Success)
                        .with_detail(url),
                );
                return StrategyResult {
                    export: Some(export),
                    attempts,
                };
            }
        }

        StrategyResult {
            export: None,
            attempts,
        }
    }
}
