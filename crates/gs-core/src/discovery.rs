//! Event discovery from the account's listing sections.
//!
//! Each section is opened through its listing control, scrolled until the
//! rendered height stops changing, and scraped for event ids. Sections are
//! independent: one that cannot be opened is reported and skipped, and a
//! section that never settles still contributes what was visible at the
//! scroll cap.

use crate::driver::{AutomationDriver, Locator};
use crate::logging::{event_names, LogContext, Stage};
use gs_common::{Error, EventId, EventIdPattern};
use gs_config::{GuestSyncConfig, SectionSettings};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// How far discovery got in one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Listing control absent or could not be opened.
    Skipped,
    /// Opened, but scrolling hit the cap or failed before settling.
    Partial,
    Complete,
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionStatus::Skipped => write!(f, "skipped"),
            SectionStatus::Partial => write!(f, "partial"),
            SectionStatus::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionReport {
    pub section: String,
    pub status: SectionStatus,
    pub ids_found: usize,
    pub scrolls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SectionReport {
    fn skipped(section: &str, reason: impl Into<String>) -> Self {
        Self {
            section: section.to_string(),
            status: SectionStatus::Skipped,
            ids_found: 0,
            scrolls: 0,
            reason: Some(reason.into()),
        }
    }
}

/// Union of ids across sections plus per-section reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryResult {
    pub ids: BTreeSet<EventId>,
    pub sections: Vec<SectionReport>,
}

/// Timing knobs for discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryTiming {
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
    pub settle: Duration,
    pub scroll_pause: Duration,
    pub stable_probes: u32,
    pub max_scroll_attempts: u32,
}

pub struct DiscoveryEngine {
    profile_url: String,
    listing: Locator,
    sections: Vec<SectionSettings>,
    pattern: EventIdPattern,
    timing: DiscoveryTiming,
}

impl DiscoveryEngine {
    pub fn new(
        profile_url: impl Into<String>,
        listing_label: &str,
        sections: Vec<SectionSettings>,
        pattern: EventIdPattern,
        timing: DiscoveryTiming,
    ) -> Self {
        Self {
            profile_url: profile_url.into(),
            listing: Locator::text(listing_label),
            sections,
            pattern,
            timing,
        }
    }

    /// Build from configuration; a missing profile URL is a config error.
    pub fn from_config(config: &GuestSyncConfig) -> Result<Self, Error> {
        let platform = &config.platform;
        let profile_url = platform
            .profile_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("platform.profile_url is required for discovery".to_string())
            })?;
        let pattern = EventIdPattern::new(&platform.event_id_pattern).map_err(|e| {
            Error::Config(format!("platform.event_id_pattern does not compile: {}", e))
        })?;
        let export = &config.export;
        Ok(Self::new(
            profile_url,
            &platform.listing_label,
            platform.sections.clone(),
            pattern,
            DiscoveryTiming {
                navigation_timeout: export.navigation_timeout(),
                selector_timeout: export.selector_timeout(),
                settle: export.settle(),
                scroll_pause: export.scroll_pause(),
                stable_probes: export.stable_probes,
                max_scroll_attempts: export.max_scroll_attempts,
            },
        ))
    }

    /// Enumerate event ids across all configured sections.
    pub fn discover(&self, driver: &mut dyn AutomationDriver, log: &LogContext) -> DiscoveryResult {
        let mut result = DiscoveryResult::default();

        if let Err(e) = driver.navigate(&self.profile_url, self.timing.navigation_timeout) {
            let reason = format!("profile page failed to load: {}", e);
            for section in &self.sections {
                self.log_skip(log, &section.name, &reason);
                result.sections.push(SectionReport::skipped(&section.name, reason.clone()));
            }
            return result;
        }

        for section in &self.sections {
            let (ids, report) = self.discover_section(driver, section, log);
            result.ids.extend(ids);
            result.sections.push(report);
        }

        crate::log_event!(
            log,
            INFO,
            event_names::DISCOVER_FINISHED,
            Stage::Discover,
            "Discovery finished",
            ids = result.ids.len() as u64,
            sections = result.sections.len() as u64
        );
        result
    }

    fn log_skip(&self, log: &LogContext, section: &str, reason: &str) {
        crate::log_event!(
            log,
            WARN,
            event_names::DISCOVER_SECTION_SKIPPED,
            Stage::Discover,
            "Section skipped",
            section = section,
            reason = reason
        );
    }

    fn discover_section(
        &self,
        driver: &mut dyn AutomationDriver,
        section: &SectionSettings,
        log: &LogContext,
    ) -> (BTreeSet<EventId>, SectionReport) {
        let name = section.name.as_str();

        let opened = driver
            .wait_for(&self.listing, self.timing.selector_timeout)
            .and_then(|visible| {
                if !visible || driver.locate(&self.listing)? <= section.index {
                    return Ok(false);
                }
                driver.trigger(&self.listing, section.index)?;
                Ok(true)
            });
        match opened {
            Ok(true) => {}
            Ok(false) => {
                let reason = format!("no listing control #{}", section.index);
                self.log_skip(log, name, &reason);
                return (BTreeSet::new(), SectionReport::skipped(name, reason));
            }
            Err(e) => {
                let reason = e.to_string();
                self.log_skip(log, name, &reason);
                return (BTreeSet::new(), SectionReport::skipped(name, reason));
            }
        }
        crate::log_event!(
            log,
            DEBUG,
            event_names::DISCOVER_SECTION_OPENED,
            Stage::Discover,
            "Section opened",
            section = name
        );
        driver.pause(self.timing.settle);

        let (scrolls, settled, scroll_error) = self.scroll_until_stable(driver);
        if !settled && scroll_error.is_none() {
            crate::log_event!(
                log,
                WARN,
                event_names::DISCOVER_SCROLL_CAPPED,
                Stage::Discover,
                "Listing never settled; using ids visible at the cap",
                section = name,
                scrolls = scrolls as u64
            );
        }

        let ids = match driver.markup() {
            Ok(markup) => self.pattern.extract(&markup),
            Err(e) => {
                let reason = format!("markup unavailable: {}", e);
                self.log_skip(log, name, &reason);
                let _ = driver.dismiss();
                return (BTreeSet::new(), SectionReport::skipped(name, reason));
            }
        };

        // The next section's control is only reachable once this one closes.
        if let Err(e) = driver.dismiss() {
            let message = e.to_string();
            crate::log_event!(
                log,
                DEBUG,
                event_names::DISCOVER_DISMISS_FAILED,
                Stage::Discover,
                "Dismiss failed",
                section = name,
                error = message.as_str()
            );
        }

        let status = if settled {
            SectionStatus::Complete
        } else {
            SectionStatus::Partial
        };
        let report = SectionReport {
            section: name.to_string(),
            status,
            ids_found: ids.len(),
            scrolls,
            reason: scroll_error.or_else(|| (!settled).then(|| "scroll cap reached".to_string())),
        };
        (ids, report)
    }

    /// Scroll until the height is unchanged for `stable_probes` consecutive
    /// probes. Returns (scrolls, settled, error).
    fn scroll_until_stable(&self, driver: &mut dyn AutomationDriver) -> (u32, bool, Option<String>) {
        let needed = self.timing.stable_probes.max(1);
        let mut last = match driver.rendered_height() {
            Ok(h) => h,
            Err(e) => return (0, false, Some(e.to_string())),
        };
        let mut stable = 0;
        let mut scrolls = 0;

        while scrolls < self.timing.max_scroll_attempts {
            if let Err(e) = driver.scroll_to_bottom() {
                return (scrolls, false, Some(e.to_string()));
            }
            scrolls += 1;
            driver.pause(self.timing.scroll_pause);
            let height = match driver.rendered_height() {
                Ok(h) => h,
                Err(e) => return (scrolls, false, Some(e.to_string())),
            };
            if height == last {
                stable += 1;
                if stable >= needed {
                    return (scrolls, true, None);
                }
            } else {
                stable = 0;
                last = height;
            }
        }
        (scrolls, false, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_profile() {
        let config = GuestSyncConfig::default();
        let err = DiscoveryEngine::from_config(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let mut config = GuestSyncConfig::default();
        config.platform.profile_url = Some("https://luma.com/user/me".into());
        assert!(DiscoveryEngine::from_config(&config).is_ok());

        config.platform.event_id_pattern = "evt-[".into();
        assert!(matches!(
            DiscoveryEngine::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_section_status_display() {
        assert_eq!(SectionStatus::Partial.to_string(), "partial");
        let report = SectionReport::skipped("past", "absent");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "absent");
    }
}
