//! Automation driver interface.
//!
//! The pipeline talks to a pre-authenticated browsing context only through
//! [`AutomationDriver`]. Element lookup is described by data-only
//! [`Locator`]s built from configured labels, so no selector strings live in
//! the discovery or export code. Every blocking operation takes or implies an
//! explicit timeout.

pub mod session;
pub mod webdriver;

pub use session::{SessionArtifact, SessionError};
pub use webdriver::{WebDriverClient, WebDriverFactory};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Generic element locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Element whose visible text equals (or contains) the label.
    Text { label: String, exact: bool },
    /// Element with an ARIA role whose accessible text contains the name.
    Role { role: String, name: String },
    /// Raw CSS selector.
    Css(String),
}

impl Locator {
    pub fn text(label: impl Into<String>) -> Self {
        Locator::Text {
            label: label.into(),
            exact: true,
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Locator::Role {
            role: role.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Text { label, exact: true } => write!(f, "text={:?}", label),
            Locator::Text { label, exact: false } => write!(f, "text~{:?}", label),
            Locator::Role { role, name } => write!(f, "role={}[{:?}]", role, name),
            Locator::Css(sel) => write!(f, "css={}", sel),
        }
    }
}

/// Browser cookie in storage-state shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Unix seconds; `-1` marks a session cookie.
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

impl Cookie {
    /// Session cookies never expire on their own.
    pub fn is_expired(&self, now_unix: f64) -> bool {
        self.expires >= 0.0 && self.expires <= now_unix
    }

    /// Domain match per cookie rules: exact host or any subdomain.
    pub fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    }
}

/// Byte stream observed after triggering an export control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    /// URL the stream came from, when observable.
    pub url: Option<String>,
}

/// Driver-level failures.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver unreachable: {0}")]
    Unavailable(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("no element matches {0}")]
    NotFound(String),

    #[error("driver protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        DriverError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

impl From<DriverError> for gs_common::Error {
    fn from(err: DriverError) -> Self {
        gs_common::Error::DriverUnavailable(err.to_string())
    }
}

/// One pre-authenticated browsing context.
///
/// Implementations are used by a single worker at a time.
pub trait AutomationDriver: Send {
    /// Load a page and wait for it to finish loading.
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Count visible elements matching the locator.
    fn locate(&mut self, locator: &Locator) -> Result<usize, DriverError>;

    /// Wait until at least one visible element matches; `false` on timeout.
    fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<bool, DriverError>;

    /// Click the `index`-th visible match.
    fn trigger(&mut self, locator: &Locator, index: usize) -> Result<(), DriverError>;

    /// Click the first match and wait for a downloaded or intercepted byte
    /// stream; `None` when nothing arrives in time.
    fn capture_on_trigger(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<CapturedStream>, DriverError>;

    fn scroll_to_bottom(&mut self) -> Result<(), DriverError>;

    /// Current scrollable height of the document, in CSS pixels.
    fn rendered_height(&mut self) -> Result<u64, DriverError>;

    /// Serialized DOM of the current page.
    fn markup(&mut self) -> Result<String, DriverError>;

    /// Send Escape to close any open overlay.
    fn dismiss(&mut self) -> Result<(), DriverError>;

    fn cookies(&mut self) -> Result<Vec<Cookie>, DriverError>;

    fn title(&mut self) -> Result<Option<String>, DriverError>;

    /// Let the page settle. Fakes override this to return immediately.
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Owned browsing context as handed out by a [`ContextFactory`].
pub type BoxedDriver = Box<dyn AutomationDriver>;

/// Opens independent browsing contexts seeded with the session artifact.
pub trait ContextFactory: Send + Sync {
    fn open_context(&self) -> Result<BoxedDriver, DriverError>;
}

/// `name=value; name=value` for cookies valid on `host`.
pub fn cookie_header(cookies: &[Cookie], host: &str, now_unix: f64) -> String {
    cookies
        .iter()
        .filter(|c| c.matches_host(host) && !c.is_expired(now_unix))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}
