//! In-process fakes for the browsing context and the HTTP fetcher.
//!
//! A [`FakeSite`] describes what the platform would render: listing sections
//! with lazily revealed ids, and per-event export behaviour. [`FakeDriver`]
//! walks that description through the [`AutomationDriver`] interface, and
//! [`FakeFetcher`] answers direct fetches from a URL table. Pauses return
//! immediately, so tests should configure zero timeouts; only
//! [`FakeExport::Stalled`] blocks for real.

use crate::driver::{
    AutomationDriver, BoxedDriver, CapturedStream, ContextFactory, Cookie, DriverError, Locator,
};
use crate::export::{FetchError, FetchResponse, HttpFetcher};
use gs_common::{EventIdPattern, DEFAULT_EVENT_ID_PATTERN};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Height added by every revealed page of a listing.
const PAGE_HEIGHT: u64 = 800;

/// One listing section on the fake profile page.
#[derive(Debug, Clone, Default)]
pub struct FakeSection {
    pub ids: Vec<String>,
    /// Scrolls needed before every id is rendered; 0 renders all at once.
    pub pages: u32,
}

impl FakeSection {
    pub fn new(ids: &[&str], pages: u32) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            pages,
        }
    }

    fn visible(&self, scrolled: u32) -> &[String] {
        if self.pages == 0 {
            return &self.ids;
        }
        let shown = (scrolled + 1).min(self.pages) as usize;
        let count = (self.ids.len() * shown).div_ceil(self.pages as usize);
        &self.ids[..count.min(self.ids.len())]
    }

    fn height(&self, scrolled: u32) -> u64 {
        let pages = self.pages.max(1);
        PAGE_HEIGHT * u64::from((scrolled + 1).min(pages))
    }
}

/// What the management surface does for one event.
#[derive(Debug, Clone)]
pub enum FakeExport {
    /// The export control yields this body.
    Capture {
        body: Vec<u8>,
        content_type: Option<String>,
        url: Option<String>,
    },
    /// The control is clicked but nothing arrives.
    Nothing,
    /// Like `Nothing`, but the capture blocks for its whole timeout.
    Stalled,
    /// The guest subview never appears.
    NoGuestTab,
    /// The guest subview appears without an export control.
    NoControl,
}

impl FakeExport {
    pub fn csv(body: &str, url: Option<&str>) -> Self {
        FakeExport::Capture {
            body: body.as_bytes().to_vec(),
            content_type: Some("text/csv".to_string()),
            url: url.map(str::to_string),
        }
    }
}

/// Scripted platform shared by every context opened from it.
#[derive(Debug)]
pub struct FakeSite {
    pub profile_url: String,
    pub listing_label: String,
    pub guest_tab_label: String,
    pub export_label: String,
    pub sections: Vec<FakeSection>,
    pub exports: HashMap<String, FakeExport>,
    pub titles: HashMap<String, String>,
    pub cookies: Vec<Cookie>,
    /// Every driver call, as `"<op> <arg>"`, across all contexts.
    calls: Mutex<Vec<String>>,
}

impl Default for FakeSite {
    fn default() -> Self {
        Self {
            profile_url: "https://luma.com/user/me".to_string(),
            listing_label: "View All".to_string(),
            guest_tab_label: "Guests".to_string(),
            export_label: "Download as CSV".to_string(),
            sections: Vec::new(),
            exports: HashMap::new(),
            titles: HashMap::new(),
            cookies: vec![Cookie {
                name: "luma.auth-session-key".to_string(),
                value: "fake-session".to_string(),
                domain: ".luma.com".to_string(),
                path: "/".to_string(),
                expires: -1.0,
                http_only: true,
                secure: true,
                same_site: None,
            }],
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, section: FakeSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn with_export(mut self, event_id: &str, export: FakeExport) -> Self {
        self.exports.insert(event_id.to_string(), export);
        self
    }

    pub fn with_title(mut self, event_id: &str, title: &str) -> Self {
        self.titles.insert(event_id.to_string(), title.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls whose operation name is `op`.
    pub fn calls_of(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .collect()
    }

    fn note(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Page {
    Blank,
    Profile,
    Manage(String),
    Other,
}

/// Browsing context over a [`FakeSite`].
pub struct FakeDriver {
    site: Arc<FakeSite>,
    pattern: Option<EventIdPattern>,
    page: Page,
    open_section: Option<usize>,
    scrolled: u32,
    guest_tab_open: bool,
}

impl FakeDriver {
    pub fn new(site: Arc<FakeSite>) -> Self {
        Self {
            site,
            pattern: EventIdPattern::new(DEFAULT_EVENT_ID_PATTERN).ok(),
            page: Page::Blank,
            open_section: None,
            scrolled: 0,
            guest_tab_open: false,
        }
    }

    fn event_in(&self, url: &str) -> Option<String> {
        let pattern = self.pattern.as_ref()?;
        pattern
            .extract(url)
            .into_iter()
            .next()
            .map(|id| id.as_str().to_string())
    }

    fn label_matches(locator: &Locator, label: &str) -> bool {
        match locator {
            Locator::Text { label: l, exact: true } => l == label,
            Locator::Text { label: l, exact: false } => label.contains(l.as_str()),
            Locator::Role { role, name } => role == "tab" && label.contains(name.as_str()),
            Locator::Css(_) => false,
        }
    }

    fn export_for(&self, event_id: &str) -> Option<&FakeExport> {
        self.site.exports.get(event_id)
    }
}

impl AutomationDriver for FakeDriver {
    fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.site.note(format!("navigate {}", url));
        self.open_section = None;
        self.scrolled = 0;
        self.guest_tab_open = false;
        self.page = if url == self.site.profile_url {
            Page::Profile
        } else if let Some(id) = self.event_in(url) {
            Page::Manage(id)
        } else {
            Page::Other
        };
        Ok(())
    }

    fn locate(&mut self, locator: &Locator) -> Result<usize, DriverError> {
        let count = match &self.page {
            Page::Profile if Self::label_matches(locator, &self.site.listing_label) => {
                self.site.sections.len()
            }
            Page::Manage(id) => {
                let export = self.export_for(id);
                let has_tab = !matches!(export, Some(FakeExport::NoGuestTab));
                let has_control = has_tab && !matches!(export, Some(FakeExport::NoControl));
                if Self::label_matches(locator, &self.site.guest_tab_label) && has_tab {
                    1
                } else if Self::label_matches(locator, &self.site.export_label)
                    && has_control
                    && self.guest_tab_open
                {
                    1
                } else {
                    0
                }
            }
            _ => 0,
        };
        Ok(count)
    }

    fn wait_for(&mut self, locator: &Locator, _timeout: Duration) -> Result<bool, DriverError> {
        Ok(self.locate(locator)? > 0)
    }

    fn trigger(&mut self, locator: &Locator, index: usize) -> Result<(), DriverError> {
        self.site.note(format!("trigger {}#{}", locator, index));
        if self.locate(locator)? <= index {
            return Err(DriverError::NotFound(locator.to_string()));
        }
        match self.page {
            Page::Profile => {
                self.open_section = Some(index);
                self.scrolled = 0;
            }
            Page::Manage(_) => {
                if Self::label_matches(locator, &self.site.guest_tab_label) {
                    self.guest_tab_open = true;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn capture_on_trigger(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<CapturedStream>, DriverError> {
        self.site.note(format!("capture {}", locator));
        if self.locate(locator)? == 0 {
            return Err(DriverError::NotFound(locator.to_string()));
        }
        let Page::Manage(id) = &self.page else {
            return Ok(None);
        };
        Ok(match self.export_for(id) {
            Some(FakeExport::Capture {
                body,
                content_type,
                url,
            }) => Some(CapturedStream {
                bytes: body.clone(),
                content_type: content_type.clone(),
                content_disposition: None,
                url: url.clone(),
            }),
            Some(FakeExport::Stalled) => {
                std::thread::sleep(timeout);
                None
            }
            _ => None,
        })
    }

    fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        if self.open_section.is_some() {
            self.scrolled += 1;
        }
        Ok(())
    }

    fn rendered_height(&mut self) -> Result<u64, DriverError> {
        Ok(match self.open_section.and_then(|i| self.site.sections.get(i)) {
            Some(section) => section.height(self.scrolled),
            None => PAGE_HEIGHT,
        })
    }

    fn markup(&mut self) -> Result<String, DriverError> {
        let mut html = String::from("<html><body>");
        if let Some(section) = self.open_section.and_then(|i| self.site.sections.get(i)) {
            for id in section.visible(self.scrolled) {
                html.push_str(&format!(r#"<a href="/event/manage/{id}">{id}</a>"#));
            }
        }
        html.push_str("</body></html>");
        Ok(html)
    }

    fn dismiss(&mut self) -> Result<(), DriverError> {
        self.site.note("dismiss".to_string());
        self.open_section = None;
        self.scrolled = 0;
        Ok(())
    }

    fn cookies(&mut self) -> Result<Vec<Cookie>, DriverError> {
        Ok(self.site.cookies.clone())
    }

    fn title(&mut self) -> Result<Option<String>, DriverError> {
        Ok(match &self.page {
            Page::Manage(id) => self.site.titles.get(id).cloned(),
            _ => None,
        })
    }

    fn pause(&mut self, _duration: Duration) {}
}

/// Factory handing out [`FakeDriver`]s over one site.
pub struct FakeContextFactory {
    site: Arc<FakeSite>,
    opened: AtomicUsize,
    unavailable: bool,
}

impl FakeContextFactory {
    pub fn new(site: Arc<FakeSite>) -> Self {
        Self {
            site,
            opened: AtomicUsize::new(0),
            unavailable: false,
        }
    }

    /// Factory whose every `open_context` fails.
    pub fn unavailable(site: Arc<FakeSite>) -> Self {
        Self {
            unavailable: true,
            ..Self::new(site)
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl ContextFactory for FakeContextFactory {
    fn open_context(&self) -> Result<BoxedDriver, DriverError> {
        if self.unavailable {
            return Err(DriverError::Unavailable("fake driver offline".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDriver::new(self.site.clone())))
    }
}

/// A request seen by [`FakeFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRequest {
    pub url: String,
    pub cookie: Option<String>,
}

/// Direct-fetch responder backed by a URL table; unknown URLs get a 404.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    routes: HashMap<String, FetchResponse>,
    requests: Mutex<Vec<FetchedRequest>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_csv(mut self, url: &str, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            FetchResponse {
                status: 200,
                content_type: Some("text/csv; charset=utf-8".to_string()),
                content_disposition: Some("attachment; filename=guests.csv".to_string()),
                body: body.as_bytes().to_vec(),
            },
        );
        self
    }

    pub fn with_response(mut self, url: &str, response: FetchResponse) -> Self {
        self.routes.insert(url.to_string(), response);
        self
    }

    pub fn requests(&self) -> Vec<FetchedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl HttpFetcher for FakeFetcher {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        _timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(FetchedRequest {
                url: url.to_string(),
                cookie: headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("cookie"))
                    .map(|(_, value)| value.to_string()),
            });
        }
        Ok(self.routes.get(url).cloned().unwrap_or(FetchResponse {
            status: 404,
            content_type: Some("text/html".to_string()),
            content_disposition: None,
            body: b"<html>not found</html>".to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_reveals_ids_as_it_scrolls() {
        let section = FakeSection::new(&["evt-1", "evt-2", "evt-3", "evt-4"], 2);
        assert_eq!(section.visible(0).len(), 2);
        assert_eq!(section.visible(1).len(), 4);
        assert_eq!(section.visible(9).len(), 4);
        assert_eq!(section.height(0), PAGE_HEIGHT);
        assert_eq!(section.height(5), 2 * PAGE_HEIGHT);
    }

    #[test]
    fn test_fake_driver_export_flow() {
        let site = Arc::new(
            FakeSite::new().with_export("evt-1", FakeExport::csv("email\na@x.com\n", None)),
        );
        let mut driver = FakeDriver::new(site.clone());
        driver
            .navigate("https://luma.com/event/manage/evt-1", Duration::ZERO)
            .unwrap();
        let export = Locator::text("Download as CSV");
        assert_eq!(driver.locate(&export).unwrap(), 0);
        driver.trigger(&Locator::role("tab", "Guests"), 0).unwrap();
        assert_eq!(driver.locate(&export).unwrap(), 1);
        let stream = driver.capture_on_trigger(&export, Duration::ZERO).unwrap();
        assert_eq!(stream.unwrap().bytes, b"email\na@x.com\n");
        assert_eq!(site.calls_of("navigate").len(), 1);
    }

    #[test]
    fn test_fake_fetcher_defaults_to_404() {
        let fetcher = FakeFetcher::new().with_csv("https://x/a", "email\n");
        let ok = fetcher
            .get("https://x/a", &[("cookie", "s=1")], Duration::ZERO)
            .unwrap();
        assert!(ok.is_success());
        let missing = fetcher.get("https://x/b", &[], Duration::ZERO).unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(fetcher.requests()[0].cookie.as_deref(), Some("s=1"));
    }
}
