//! Discovery against a scripted profile page.

use gs_common::{EventId, EventIdPattern, DEFAULT_EVENT_ID_PATTERN};
use gs_config::SectionSettings;
use gs_core::discovery::{DiscoveryEngine, DiscoveryTiming, SectionStatus};
use gs_core::driver::ContextFactory;
use gs_core::logging::LogContext;
use gs_core::test_utils::{FakeContextFactory, FakeSection, FakeSite};
use std::sync::Arc;
use std::time::Duration;

fn engine(sections: &[&str], max_scroll_attempts: u32) -> DiscoveryEngine {
    let sections = sections
        .iter()
        .enumerate()
        .map(|(index, name)| SectionSettings {
            name: name.to_string(),
            index,
        })
        .collect();
    DiscoveryEngine::new(
        "https://luma.com/user/me",
        "View All",
        sections,
        EventIdPattern::new(DEFAULT_EVENT_ID_PATTERN).unwrap(),
        DiscoveryTiming {
            navigation_timeout: Duration::ZERO,
            selector_timeout: Duration::ZERO,
            settle: Duration::ZERO,
            scroll_pause: Duration::ZERO,
            stable_probes: 2,
            max_scroll_attempts,
        },
    )
}

fn log() -> LogContext {
    LogContext::new("gs-test", "host-test")
}

fn id(s: &str) -> EventId {
    EventId::parse(s).unwrap()
}

#[test]
fn test_sections_are_unioned_and_deduplicated() {
    let site = Arc::new(
        FakeSite::new()
            .with_section(FakeSection::new(&["evt-a", "evt-b", "evt-c"], 3))
            .with_section(FakeSection::new(&["evt-c", "evt-d"], 0)),
    );
    let factory = FakeContextFactory::new(site.clone());
    let mut driver = factory.open_context().unwrap();

    let result = engine(&["hosting", "past"], 20).discover(&mut *driver, &log());

    let ids: Vec<&str> = result.ids.iter().map(EventId::as_str).collect();
    assert_eq!(ids, vec!["evt-a", "evt-b", "evt-c", "evt-d"]);
    assert_eq!(result.sections.len(), 2);
    assert!(result
        .sections
        .iter()
        .all(|s| s.status == SectionStatus::Complete));
    assert_eq!(result.sections[0].ids_found, 3);
    assert_eq!(result.sections[1].ids_found, 2);

    // Lazy listing: two growing scrolls, then two stable probes.
    assert_eq!(result.sections[0].scrolls, 4);
    assert_eq!(result.sections[1].scrolls, 2);
    assert_eq!(site.calls_of("dismiss").len(), 2);
}

#[test]
fn test_missing_section_is_skipped() {
    let site =
        Arc::new(FakeSite::new().with_section(FakeSection::new(&["evt-a", "evt-b"], 0)));
    let mut driver = FakeContextFactory::new(site).open_context().unwrap();

    let result = engine(&["hosting", "past"], 20).discover(&mut *driver, &log());

    assert_eq!(result.ids.len(), 2);
    assert!(result.ids.contains(&id("evt-a")));
    let past = &result.sections[1];
    assert_eq!(past.section, "past");
    assert_eq!(past.status, SectionStatus::Skipped);
    assert_eq!(past.ids_found, 0);
    assert_eq!(past.reason.as_deref(), Some("no listing control #1"));
}

#[test]
fn test_scroll_cap_keeps_visible_ids() {
    let ids: Vec<String> = (0..10).map(|i| format!("evt-{i}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let site = Arc::new(FakeSite::new().with_section(FakeSection::new(&refs, 10)));
    let mut driver = FakeContextFactory::new(site).open_context().unwrap();

    let result = engine(&["hosting"], 3).discover(&mut *driver, &log());

    let hosting = &result.sections[0];
    assert_eq!(hosting.status, SectionStatus::Partial);
    assert_eq!(hosting.scrolls, 3);
    assert_eq!(hosting.reason.as_deref(), Some("scroll cap reached"));
    // Four of ten pages were rendered when the cap hit.
    assert_eq!(hosting.ids_found, 4);
    assert_eq!(result.ids.len(), 4);
}

#[test]
fn test_no_sections_found_on_empty_profile() {
    let site = Arc::new(FakeSite::new());
    let mut driver = FakeContextFactory::new(site).open_context().unwrap();

    let result = engine(&["hosting", "past"], 5).discover(&mut *driver, &log());

    assert!(result.ids.is_empty());
    assert!(result
        .sections
        .iter()
        .all(|s| s.status == SectionStatus::Skipped));
}
