//! W3C WebDriver adapter.
//!
//! Speaks the WebDriver wire protocol over HTTP to a running
//! chromedriver/geckodriver. Each [`WebDriverClient`] owns one browser
//! session seeded with the platform cookies from the session artifact.
//!
//! Export capture works two ways at once: a page hook records fetch/XHR
//! responses that look like exports, and a per-session download directory
//! is watched for new files. Whichever produces bytes first wins.

use super::{
    AutomationDriver, BoxedDriver, CapturedStream, ContextFactory, Cookie, DriverError, Locator,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const ESCAPE_KEY: &str = "\u{E00C}";

/// Installs the response hook; safe to run more than once per page.
const CAPTURE_HOOK: &str = r#"
if (!window.__gsCapture) {
  window.__gsCapture = { hits: [] };
  const wanted = (url, ct, cd) =>
    /export/i.test(url || '') || /csv/i.test(ct || '') || /attachment/i.test(cd || '');
  const origFetch = window.fetch;
  window.fetch = async function () {
    const res = await origFetch.apply(this, arguments);
    try {
      const ct = res.headers.get('content-type') || '';
      const cd = res.headers.get('content-disposition') || '';
      if (wanted(res.url, ct, cd)) {
        res.clone().text().then(body =>
          window.__gsCapture.hits.push({ url: res.url, contentType: ct, disposition: cd, body }));
      }
    } catch (e) {}
    return res;
  };
  const origOpen = XMLHttpRequest.prototype.open;
  const origSend = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.open = function (method, url) {
    this.__gsUrl = url;
    return origOpen.apply(this, arguments);
  };
  XMLHttpRequest.prototype.send = function () {
    this.addEventListener('load', function () {
      try {
        const ct = this.getResponseHeader('content-type') || '';
        const cd = this.getResponseHeader('content-disposition') || '';
        const url = this.responseURL || this.__gsUrl;
        if (wanted(url, ct, cd) && (this.responseType === '' || this.responseType === 'text')) {
          window.__gsCapture.hits.push({ url, contentType: ct, disposition: cd, body: this.responseText });
        }
      } catch (e) {}
    });
    return origSend.apply(this, arguments);
  };
}
window.__gsCapture.hits = [];
"#;

const CAPTURE_POLL: &str =
    "return (window.__gsCapture && window.__gsCapture.hits.length) ? window.__gsCapture.hits.shift() : null;";

/// Opens one WebDriver session per browsing context.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    endpoint: String,
    base_url: String,
    cookies: Vec<Cookie>,
    headless: bool,
    download_root: PathBuf,
}

impl WebDriverFactory {
    /// `endpoint` is the driver server URL, `base_url` the platform origin
    /// the cookies belong to.
    pub fn new(
        endpoint: impl Into<String>,
        base_url: impl Into<String>,
        cookies: Vec<Cookie>,
        headless: bool,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            base_url: base_url.into(),
            cookies,
            headless,
            download_root: std::env::temp_dir().join("guest-sync-downloads"),
        }
    }

    pub fn with_download_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.download_root = root.into();
        self
    }

    /// Check that the driver server answers and reports ready.
    pub fn probe(&self) -> Result<(), DriverError> {
        let agent = agent();
        let url = format!("{}/status", self.endpoint);
        let body = call(agent.get(&url).timeout(Duration::from_secs(5)), None)?;
        match body.get("ready").and_then(Value::as_bool) {
            Some(false) => Err(DriverError::Unavailable(format!(
                "{} reports not ready: {}",
                self.endpoint,
                body.get("message").and_then(Value::as_str).unwrap_or("")
            ))),
            _ => Ok(()),
        }
    }

    fn capabilities(&self, download_dir: &Path) -> Value {
        let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage"];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "download.default_directory": download_dir.display().to_string(),
                            "download.prompt_for_download": false
                        }
                    }
                }
            }
        })
    }
}

impl ContextFactory for WebDriverFactory {
    fn open_context(&self) -> Result<BoxedDriver, DriverError> {
        let download_dir = self
            .download_root
            .join(uuid::Uuid::new_v4().simple().to_string());
        std::fs::create_dir_all(&download_dir)
            .map_err(|e| DriverError::Protocol(format!("download dir: {}", e)))?;

        let agent = agent();
        let url = format!("{}/session", self.endpoint);
        let value = call(
            agent.post(&url).timeout(COMMAND_TIMEOUT),
            Some(self.capabilities(&download_dir)),
        )?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol("new session response lacks sessionId".into()))?
            .to_string();
        debug!(session_id = %session_id, "webdriver session opened");

        let mut client = WebDriverClient {
            agent,
            session_url: format!("{}/session/{}", self.endpoint, session_id),
            download_dir: Some(download_dir),
        };
        client.seed_cookies(&self.base_url, &self.cookies)?;
        Ok(Box::new(client))
    }
}

/// One live WebDriver session.
pub struct WebDriverClient {
    agent: ureq::Agent,
    session_url: String,
    download_dir: Option<PathBuf>,
}

impl WebDriverClient {
    fn post(&self, path: &str, body: Value, timeout: Duration) -> Result<Value, DriverError> {
        let url = format!("{}/{}", self.session_url, path);
        call(self.agent.post(&url).timeout(timeout), Some(body))
    }

    fn get(&self, path: &str) -> Result<Value, DriverError> {
        let url = format!("{}/{}", self.session_url, path);
        call(self.agent.get(&url).timeout(COMMAND_TIMEOUT), None)
    }

    fn execute(&self, script: &str) -> Result<Value, DriverError> {
        self.post(
            "execute/sync",
            json!({ "script": script, "args": [] }),
            COMMAND_TIMEOUT,
        )
    }

    fn seed_cookies(&mut self, base_url: &str, cookies: &[Cookie]) -> Result<(), DriverError> {
        // Cookies can only be set for the origin currently loaded.
        self.navigate(base_url, COMMAND_TIMEOUT)?;
        for cookie in cookies {
            let mut body = json!({
                "name": cookie.name,
                "value": cookie.value,
                "path": cookie.path,
                "domain": cookie.domain,
                "secure": cookie.secure,
                "httpOnly": cookie.http_only,
            });
            if cookie.expires >= 0.0 {
                body["expiry"] = json!(cookie.expires as i64);
            }
            if let Some(same_site) = &cookie.same_site {
                body["sameSite"] = json!(same_site);
            }
            self.post("cookie", json!({ "cookie": body }), COMMAND_TIMEOUT)?;
        }
        Ok(())
    }

    /// Element references for the locator, visible ones only.
    fn find_visible(&self, locator: &Locator) -> Result<Vec<String>, DriverError> {
        let (using, value) = locator_query(locator);
        let found = self.post(
            "elements",
            json!({ "using": using, "value": value }),
            COMMAND_TIMEOUT,
        )?;
        let ids: Vec<String> = found
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut visible = Vec::with_capacity(ids.len());
        for id in ids {
            let displayed = self.get(&format!("element/{}/displayed", id))?;
            if displayed.as_bool().unwrap_or(false) {
                visible.push(id);
            }
        }
        Ok(visible)
    }

    fn download_snapshot(&self) -> BTreeSet<PathBuf> {
        let Some(dir) = &self.download_dir else {
            return BTreeSet::new();
        };
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }

    fn take_download(&self, before: &BTreeSet<PathBuf>) -> Option<CapturedStream> {
        let after = self.download_snapshot();
        let path = after.difference(before).find(|p| is_complete_download(p))?;
        let bytes = std::fs::read(path).ok()?;
        let _ = std::fs::remove_file(path);
        let content_type = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Some("text/csv".to_string()),
            Some("tsv") => Some("text/tab-separated-values".to_string()),
            Some("txt") => Some("text/plain".to_string()),
            _ => None,
        };
        Some(CapturedStream {
            bytes,
            content_type,
            content_disposition: Some("attachment".to_string()),
            url: None,
        })
    }

    fn take_intercepted(&self) -> Result<Option<CapturedStream>, DriverError> {
        let hit = self.execute(CAPTURE_POLL)?;
        if hit.is_null() {
            return Ok(None);
        }
        let text = |key: &str| {
            hit.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(Some(CapturedStream {
            bytes: text("body").unwrap_or_default().into_bytes(),
            content_type: text("contentType"),
            content_disposition: text("disposition"),
            url: text("url"),
        }))
    }
}

impl AutomationDriver for WebDriverClient {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        self.post(
            "timeouts",
            json!({ "pageLoad": timeout.as_millis() as u64 }),
            COMMAND_TIMEOUT,
        )?;
        self.post("url", json!({ "url": url }), timeout + Duration::from_secs(5))
            .map(|_| ())
            .map_err(|e| match e {
                DriverError::Timeout { .. } => DriverError::timeout(format!("navigate {}", url), timeout),
                other => other,
            })
    }

    fn locate(&mut self, locator: &Locator) -> Result<usize, DriverError> {
        Ok(self.find_visible(locator)?.len())
    }

    fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.find_visible(locator)?.is_empty() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn trigger(&mut self, locator: &Locator, index: usize) -> Result<(), DriverError> {
        let elements = self.find_visible(locator)?;
        let id = elements
            .get(index)
            .ok_or_else(|| DriverError::NotFound(format!("{} #{}", locator, index)))?;
        self.post(&format!("element/{}/click", id), json!({}), COMMAND_TIMEOUT)?;
        Ok(())
    }

    fn capture_on_trigger(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<CapturedStream>, DriverError> {
        self.execute(CAPTURE_HOOK)?;
        let before = self.download_snapshot();
        self.trigger(locator, 0)?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(stream) = self.take_intercepted()? {
                return Ok(Some(stream));
            }
            if let Some(stream) = self.take_download(&before) {
                return Ok(Some(stream));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        self.execute("window.scrollTo(0, document.body.scrollHeight);")?;
        Ok(())
    }

    fn rendered_height(&mut self) -> Result<u64, DriverError> {
        let value = self.execute("return document.body.scrollHeight;")?;
        value
            .as_u64()
            .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
            .ok_or_else(|| DriverError::Protocol(format!("unexpected height: {}", value)))
    }

    fn markup(&mut self) -> Result<String, DriverError> {
        let value = self.get("source")?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn dismiss(&mut self) -> Result<(), DriverError> {
        self.post(
            "actions",
            json!({
                "actions": [{
                    "type": "key",
                    "id": "keyboard",
                    "actions": [
                        { "type": "keyDown", "value": ESCAPE_KEY },
                        { "type": "keyUp", "value": ESCAPE_KEY }
                    ]
                }]
            }),
            COMMAND_TIMEOUT,
        )?;
        Ok(())
    }

    fn cookies(&mut self) -> Result<Vec<Cookie>, DriverError> {
        let value = self.get("cookie")?;
        let items = value.as_array().cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .filter_map(|item| {
                Some(Cookie {
                    name: item.get("name")?.as_str()?.to_string(),
                    value: item.get("value")?.as_str()?.to_string(),
                    domain: item
                        .get("domain")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    path: item
                        .get("path")
                        .and_then(Value::as_str)
                        .unwrap_or("/")
                        .to_string(),
                    expires: item.get("expiry").and_then(Value::as_f64).unwrap_or(-1.0),
                    http_only: item.get("httpOnly").and_then(Value::as_bool).unwrap_or(false),
                    secure: item.get("secure").and_then(Value::as_bool).unwrap_or(false),
                    same_site: item
                        .get("sameSite")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
            .collect())
    }

    fn title(&mut self) -> Result<Option<String>, DriverError> {
        let value = self.get("title")?;
        Ok(value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }
}

impl Drop for WebDriverClient {
    fn drop(&mut self) {
        let _ = self.agent.delete(&self.session_url).timeout(COMMAND_TIMEOUT).call();
        if let Some(dir) = &self.download_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .build()
}

/// Send a command and unwrap the W3C `value` envelope.
fn call(request: ureq::Request, body: Option<Value>) -> Result<Value, DriverError> {
    let response = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    match response {
        Ok(resp) => {
            let mut envelope: Value = resp
                .into_json()
                .map_err(|e| DriverError::Protocol(format!("invalid response body: {}", e)))?;
            Ok(envelope.get_mut("value").map(Value::take).unwrap_or(Value::Null))
        }
        Err(ureq::Error::Status(status, resp)) => {
            let envelope: Value = resp.into_json().unwrap_or(Value::Null);
            Err(map_protocol_error(status, &envelope))
        }
        Err(ureq::Error::Transport(transport)) => {
            let message = transport.to_string();
            if message.to_ascii_lowercase().contains("timed out") {
                Err(DriverError::timeout("webdriver command", COMMAND_TIMEOUT))
            } else {
                Err(DriverError::Unavailable(message))
            }
        }
    }
}

fn map_protocol_error(status: u16, envelope: &Value) -> DriverError {
    let value = envelope.get("value").unwrap_or(envelope);
    let code = value.get("error").and_then(Value::as_str).unwrap_or("");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .lines()
        .next()
        .unwrap_or("")
        .to_string();
    match code {
        "timeout" | "script timeout" => DriverError::timeout(message, COMMAND_TIMEOUT),
        "no such element" | "stale element reference" => DriverError::NotFound(message),
        "session not created" | "invalid session id" => DriverError::Unavailable(message),
        _ => DriverError::Protocol(format!("HTTP {} {}: {}", status, code, message)),
    }
}

/// Translate a locator into a WebDriver strategy and query.
pub(crate) fn locator_query(locator: &Locator) -> (&'static str, String) {
    match locator {
        Locator::Css(selector) => ("css selector", selector.clone()),
        Locator::Text { label, exact } => {
            let lit = xpath_literal(label);
            let test = if *exact {
                format!("normalize-space(.)={}", lit)
            } else {
                format!("contains(normalize-space(.), {})", lit)
            };
            // Innermost element carrying the text, not every ancestor.
            ("xpath", format!("//*[{test}][not(descendant::*[{test}])]"))
        }
        Locator::Role { role, name } => (
            "xpath",
            format!(
                "//*[@role={}][contains(normalize-space(.), {})]",
                xpath_literal(role),
                xpath_literal(name)
            ),
        ),
    }
}

fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{}'", s)
    } else if !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn is_complete_download(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    !(name.is_empty()
        || name.starts_with('.')
        || name.ends_with(".crdownload")
        || name.ends_with(".part")
        || name.ends_with(".tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("Guests"), "'Guests'");
        assert_eq!(xpath_literal("Guest's"), "\"Guest's\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn test_locator_queries() {
        let (using, value) = locator_query(&Locator::text("View All"));
        assert_eq!(using, "xpath");
        assert_eq!(
            value,
            "//*[normalize-space(.)='View All'][not(descendant::*[normalize-space(.)='View All'])]"
        );

        let (using, value) = locator_query(&Locator::role("tab", "Guests"));
        assert_eq!(using, "xpath");
        assert!(value.starts_with("//*[@role='tab']"));

        let (using, value) = locator_query(&Locator::Css("a.download".into()));
        assert_eq!(using, "css selector");
        assert_eq!(value, "a.download");
    }

    #[test]
    fn test_protocol_error_mapping() {
        let timeout = json!({"value": {"error": "timeout", "message": "page load\nstack"}});
        assert!(map_protocol_error(500, &timeout).is_timeout());

        let missing = json!({"value": {"error": "no such element", "message": "x"}});
        assert!(matches!(
            map_protocol_error(404, &missing),
            DriverError::NotFound(_)
        ));

        let other = json!({"value": {"error": "unknown error", "message": "boom"}});
        assert!(map_protocol_error(500, &other)
            .to_string()
            .contains("HTTP 500 unknown error: boom"));
    }

    #[test]
    fn test_partial_downloads_are_ignored() {
        assert!(is_complete_download(Path::new("/d/evt-1.csv")));
        assert!(!is_complete_download(Path::new("/d/evt-1.csv.crdownload")));
        assert!(!is_complete_download(Path::new("/d/.com.google.Chrome.x")));
    }

    #[test]
    fn test_unreachable_driver_is_unavailable() {
        // Port 9 (discard) is essentially never a WebDriver server.
        let factory = WebDriverFactory::new("http://127.0.0.1:9", "https://luma.com", vec![], true);
        let err = factory.probe().unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_) | DriverError::Timeout { .. }));
    }
}
