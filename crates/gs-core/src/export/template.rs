//! Export URL templates.
//!
//! A successful UI export reveals the URL the platform served the file
//! from. With the event id replaced by `{EVENT}` it becomes the learned
//! template, set at most once per run and read by every worker.

use gs_common::EventId;
use gs_config::EVENT_PLACEHOLDER;
use std::sync::OnceLock;

/// Write-once learned template shared by all workers of a run.
#[derive(Debug, Default)]
pub struct LearnedTemplate {
    cell: OnceLock<String>,
}

impl LearnedTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a template from an observed export URL.
    ///
    /// Returns the template only if this call set it. URLs that do not
    /// contain the event id teach nothing.
    pub fn learn(&self, observed_url: &str, event_id: &EventId) -> Option<&str> {
        let template = derive_template(observed_url, event_id)?;
        let mut stored = false;
        let value = self.cell.get_or_init(|| {
            stored = true;
            template
        });
        stored.then_some(value.as_str())
    }

    pub fn get(&self) -> Option<&str> {
        self.cell.get().map(String::as_str)
    }
}

/// Replace every occurrence of the id in `url` with the placeholder.
pub fn derive_template(url: &str, event_id: &EventId) -> Option<String> {
    let id = event_id.as_str();
    if id.is_empty() || !url.contains(id) {
        return None;
    }
    Some(url.replace(id, EVENT_PLACEHOLDER))
}

/// Substitute the event id into a template.
pub fn render(template: &str, event_id: &EventId) -> String {
    template.replace(EVENT_PLACEHOLDER, event_id.as_str())
}

/// Candidate direct-fetch URLs: the learned template first, then the
/// configured fallbacks, without duplicates.
pub fn candidate_urls(
    learned: Option<&str>,
    fallbacks: &[String],
    event_id: &EventId,
) -> Vec<String> {
    let mut urls: Vec<String> = Vec::with_capacity(fallbacks.len() + 1);
    for template in learned.into_iter().chain(fallbacks.iter().map(String::as_str)) {
        let url = render(template, event_id);
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EventId {
        EventId::parse(s).unwrap()
    }

    #[test]
    fn test_derive_template() {
        let t = derive_template(
            "https://api.luma.com/event/admin/export-guests?event_api_id=evt-AAA",
            &id("evt-AAA"),
        );
        assert_eq!(
            t.as_deref(),
            Some("https://api.luma.com/event/admin/export-guests?event_api_id={EVENT}")
        );
        assert!(derive_template("https://x/export", &id("evt-AAA")).is_none());
    }

    #[test]
    fn test_learned_template_is_write_once() {
        let learned = LearnedTemplate::new();
        assert!(learned.get().is_none());
        assert_eq!(
            learned.learn("https://x/evt-1/export", &id("evt-1")),
            Some("https://x/{EVENT}/export")
        );
        assert_eq!(learned.learn("https://y/evt-2/csv", &id("evt-2")), None);
        assert_eq!(learned.get(), Some("https://x/{EVENT}/export"));
    }

    #[test]
    fn test_learn_ignores_urls_without_id() {
        let learned = LearnedTemplate::new();
        assert_eq!(learned.learn("blob:https://x/123", &id("evt-1")), None);
        assert!(learned.get().is_none());
    }

    #[test]
    fn test_candidate_urls_order_and_dedup() {
        let fallbacks = vec![
            "https://x/{EVENT}/export".to_string(),
            "https://x/api/{EVENT}".to_string(),
        ];
        let urls = candidate_urls(Some("https://x/{EVENT}/export"), &fallbacks, &id("evt-9"));
        assert_eq!(urls, vec!["https://x/evt-9/export", "https://x/api/evt-9"]);

        let urls = candidate_urls(Some("https://learned/{EVENT}"), &fallbacks, &id("evt-9"));
        assert_eq!(urls[0], "https://learned/evt-9");
        assert_eq!(urls.len(), 3);
    }
}
