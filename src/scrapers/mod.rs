//! Portal scraper contract and the shared behavior every portal composes.
//!
//! One required operation — scrape a live page into normalized
//! `TenderResult`s — plus free-function helpers for the things all portals do
//! the same way: human-paced delays, bounded readiness waits, diagnostic
//! snapshots, reference synthesis, selector-strategy fallback chains and the
//! pagination termination rule. Deliberately no base-struct inheritance; each
//! scraper owns its config and calls what it needs.

pub mod austender;
pub mod nsw;
pub mod nz_gets;
pub mod qld;
pub mod victoria;

use crate::browser::Page;
use crate::config::{AppConfig, PortalConfig};
use crate::dates::normalize_date;
use crate::filter::is_healthcare_related;
use crate::models::{RawListing, TenderResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::RngExt;
use scraper::Html;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// One government e-tendering portal.
#[async_trait]
pub trait PortalScraper: Send + Sync {
    /// Stable portal key (`austender`, `victoria`, …) used for attribution,
    /// filtering and the audit log.
    fn key(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Drive the given page/session and return every matching tender found.
    /// Item-level parse failures are skipped, not propagated; an error return
    /// means no usable page state existed at all.
    async fn scrape(&self, page: &mut dyn Page) -> Result<Vec<TenderResult>>;
}

/// Construct the scraper for a portal key, or None for an unknown key.
pub fn build_scraper(cfg: &PortalConfig, app: &AppConfig) -> Option<Box<dyn PortalScraper>> {
    let scraper: Box<dyn PortalScraper> = match cfg.key {
        "austender" => Box::new(austender::AusTenderScraper::new(cfg.clone(), app)),
        "victoria" => Box::new(victoria::VictoriaScraper::new(cfg.clone(), app)),
        "nsw" => Box::new(nsw::NswScraper::new(cfg.clone(), app)),
        "qld" => Box::new(qld::QldScraper::new(cfg.clone(), app)),
        "nz-gets" => Box::new(nz_gets::NzGetsScraper::new(cfg.clone(), app)),
        _ => return None,
    };
    Some(scraper)
}

// ── Human delay ───────────────────────────────────────────────────────────────

/// Randomized pause between navigation actions so traffic doesn't look
/// scripted. Anti-bot measure, not a correctness requirement — tests run with
/// a paused clock and never feel it.
pub async fn human_delay(min_ms: u64, max_ms: u64) {
    let ms = if max_ms > min_ms {
        rand::rng().random_range(min_ms..=max_ms)
    } else {
        min_ms
    };
    sleep(Duration::from_millis(ms)).await;
}

// ── Bounded readiness wait ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait until `ready` accepts the page content, reloading between polls.
/// `retries` extra attempt windows of `attempt_timeout` each are allowed
/// before giving up. Resolves to `TimedOut` on exhaustion — callers decide
/// whether to parse degraded state or bail; nothing here throws or hangs.
pub async fn wait_for_content<F>(
    page: &mut dyn Page,
    ready: F,
    retries: u32,
    attempt_timeout: Duration,
) -> WaitOutcome
where
    F: Fn(&str) -> bool,
{
    for attempt in 0..=retries {
        if ready(page.content()) {
            return WaitOutcome::Ready;
        }

        let deadline = Instant::now() + attempt_timeout;
        while Instant::now() < deadline {
            sleep(POLL_INTERVAL).await;
            if let Err(e) = page.reload().await {
                debug!("reload during readiness wait failed: {}", e);
                break;
            }
            if ready(page.content()) {
                return WaitOutcome::Ready;
            }
        }
        debug!("readiness attempt {} timed out", attempt + 1);
    }
    WaitOutcome::TimedOut
}

// ── Diagnostic snapshots ──────────────────────────────────────────────────────

/// Dump the page to `{portal}-{label}-{epochMillis}.html` under the debug
/// directory. Purely diagnostic; failures are logged and swallowed so this can
/// never affect control flow.
pub async fn debug_snapshot(page: &mut dyn Page, dir: &Path, portal: &str, label: &str) {
    let millis = Utc::now().timestamp_millis();
    let path = dir.join(format!("{portal}-{label}-{millis}.html"));
    match page.snapshot(&path).await {
        Ok(()) => debug!("{}: snapshot written to {:?}", portal, path),
        Err(e) => warn!("{}: snapshot to {:?} failed: {}", portal, path, e),
    }
}

// ── Reference synthesis ───────────────────────────────────────────────────────

/// `"{PREFIX}-{epochMillis}-{6 base36 chars}"` for listings with no natural
/// reference. The random tail keeps same-millisecond calls distinct; stability
/// across runs is a known limitation of synthesized references.
pub fn synth_reference(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let mut rng = rand::rng();
    let tail: String = (0..6)
        .map(|_| {
            let d = rng.random_range(0u32..36);
            char::from_digit(d, 36).unwrap_or('0')
        })
        .collect();
    format!("{}-{}-{}", prefix, millis, tail)
}

// ── Title sanity ──────────────────────────────────────────────────────────────

/// Reject values that are clearly not tender titles: bare numeric IDs, link
/// furniture ("Full Details"), and anything under 10 characters.
pub fn looks_like_title(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 10 {
        return false;
    }
    if t.chars().all(|c| c.is_ascii_digit() || c.is_ascii_punctuation() || c.is_whitespace()) {
        return false;
    }
    let lower = t.to_lowercase();
    !matches!(
        lower.as_str(),
        "full details" | "view details" | "more information" | "view tender" | "read more..."
    )
}

// ── Selector-strategy fallback chain ──────────────────────────────────────────

pub type Strategy = fn(&Html) -> Vec<RawListing>;

/// Run an ordered chain of parsing strategies (most structured first) and
/// return the first non-empty yield. The matched strategy name is logged so
/// operators can tell when markup drift has pushed a portal onto a weaker
/// strategy.
pub fn run_strategies(portal: &str, doc: &Html, strategies: &[(&str, Strategy)]) -> Vec<RawListing> {
    for (name, strategy) in strategies {
        let listings = strategy(doc);
        if !listings.is_empty() {
            info!(
                "{}: strategy '{}' matched {} listings",
                portal,
                name,
                listings.len()
            );
            return listings;
        }
        debug!("{}: strategy '{}' yielded nothing", portal, name);
    }
    Vec::new()
}

// ── Pagination ────────────────────────────────────────────────────────────────

/// State of a "next page" control found in the current DOM.
#[derive(Debug, Clone)]
pub struct NextControl {
    pub href: Option<String>,
    pub disabled: bool,
}

const NEXT_SELECTORS: &[&str] = &[
    "a[rel='next']",
    "li.next a",
    "a.next",
    ".pagination-next a",
    "a[aria-label='Next']",
    "a[aria-label='Next page']",
];

/// Locate a next-page control in the rendered DOM, if any.
pub fn find_next_control(doc: &Html) -> Option<NextControl> {
    for sel_str in NEXT_SELECTORS {
        let Ok(sel) = scraper::Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            return Some(inspect_control(el));
        }
    }

    // Text-based fallback: anchors labelled "Next" / "›"
    let Ok(a_sel) = scraper::Selector::parse("a") else {
        return None;
    };
    for a in doc.select(&a_sel) {
        let text = element_text(&a).to_lowercase();
        if text == "next" || text == "next ›" || text == "›" || text == "next »" {
            return Some(inspect_control(a));
        }
    }
    None
}

fn inspect_control(el: scraper::ElementRef<'_>) -> NextControl {
    let v = el.value();
    let class_disabled = |classes: Option<&str>| {
        classes
            .map(|c| c.split_whitespace().any(|c| c == "disabled" || c == "is-disabled"))
            .unwrap_or(false)
    };

    let mut disabled = v.attr("disabled").is_some()
        || v.attr("aria-disabled") == Some("true")
        || class_disabled(v.attr("class"));

    // Some pagination widgets disable the wrapping <li>, not the anchor.
    if !disabled {
        disabled = el
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .take(2)
            .any(|anc| class_disabled(anc.value().attr("class")));
    }

    NextControl {
        href: v.attr("href").map(|h| h.to_string()),
        disabled,
    }
}

/// The universal pagination termination rule: keep going only while under the
/// page budget, the current page yielded something, and an enabled next
/// control with a target exists. `max_pages` bounds the loop even if a broken
/// portal serves an endlessly clickable "next".
pub fn should_continue(
    page_num: u32,
    max_pages: u32,
    page_yield: usize,
    next: Option<&NextControl>,
) -> bool {
    page_num < max_pages
        && page_yield > 0
        && next.is_some_and(|n| !n.disabled && n.href.is_some())
}

// ── URL resolution ────────────────────────────────────────────────────────────

/// Resolve a possibly-relative href against the portal base URL. Unparseable
/// inputs fall back to the base so a record never carries a broken URL.
pub fn resolve_url(base: &str, href: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(u) => u.to_string(),
        Err(_) => base.to_string(),
    }
}

// ── Finalization ──────────────────────────────────────────────────────────────

/// Turn a raw extraction row into a normalized record: title sanity check,
/// URL resolution, reference synthesis when the portal exposed none, close
/// date normalization, default issuing body. Returns None for rows that fail
/// extraction-time validation (they are skipped, never stored as garbage).
pub fn finalize(raw: RawListing, cfg: &PortalConfig) -> Option<TenderResult> {
    if !looks_like_title(&raw.title) {
        debug!("{}: dropping non-title '{}'", cfg.key, raw.title);
        return None;
    }

    let source_url = match raw.href.as_deref() {
        Some(h) => resolve_url(cfg.base_url, h),
        None => cfg.base_url.to_string(),
    };

    let tender_reference = raw
        .reference
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| synth_reference(&cfg.key.to_uppercase()));

    Some(TenderResult {
        tender_reference,
        issuing_body: raw
            .agency
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| cfg.default_agency.to_string()),
        title: raw.title.trim().to_string(),
        description: raw.description.filter(|d| !d.trim().is_empty()),
        region: cfg.region.to_string(),
        close_date: normalize_date(raw.close_date_text.as_deref()),
        estimated_value: None,
        source_url,
        portal: cfg.key.to_string(),
    })
}

// ── Healthcare filtering with stale-list escape valve ─────────────────────────

/// Apply the healthcare keyword filter to a portal's extracted results. If the
/// filter would drop everything the raw extraction found, return the
/// unfiltered set instead and complain loudly — zero matches across a whole
/// portal means the keyword list has drifted, and silently storing nothing
/// would hide that.
pub fn filter_with_fallback(portal: &str, raw: Vec<TenderResult>) -> Vec<TenderResult> {
    if raw.is_empty() {
        return raw;
    }

    let filtered: Vec<TenderResult> = raw
        .iter()
        .filter(|t| is_healthcare_related(&t.title, t.description.as_deref()))
        .cloned()
        .collect();

    if filtered.is_empty() {
        warn!(
            "{}: keyword filter matched 0 of {} raw results — returning unfiltered set. \
             Check the keyword list against current portal content.",
            portal,
            raw.len()
        );
        return raw;
    }

    info!(
        "{}: {} of {} results matched healthcare keywords",
        portal,
        filtered.len(),
        raw.len()
    );
    filtered
}

// ── Shared text extraction ────────────────────────────────────────────────────

/// Collect an element's text with whitespace collapsed.
pub fn element_text(el: &scraper::ElementRef<'_>) -> String {
    let joined: String = el.text().collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockPage;
    use std::collections::HashSet;

    fn tender(title: &str, description: Option<&str>) -> TenderResult {
        TenderResult {
            tender_reference: format!("T-{}", title.len()),
            issuing_body: "Test Agency".into(),
            title: title.into(),
            description: description.map(Into::into),
            region: "Australia".into(),
            close_date: None,
            estimated_value: None,
            source_url: "https://example.gov.au/t/1".into(),
            portal: "austender".into(),
        }
    }

    #[test]
    fn test_synth_reference_distinct_within_one_millisecond() {
        let refs: HashSet<String> = (0..200).map(|_| synth_reference("QLD")).collect();
        assert_eq!(refs.len(), 200);
        assert!(refs.iter().all(|r| r.starts_with("QLD-")));
    }

    #[test]
    fn test_looks_like_title() {
        assert!(looks_like_title("Supply of clinical consumables"));
        assert!(!looks_like_title("12345678901"));
        assert!(!looks_like_title("Full Details"));
        assert!(!looks_like_title("short"));
        assert!(!looks_like_title("   "));
    }

    #[test]
    fn test_pagination_rule_stops_on_disabled_next() {
        let enabled = NextControl {
            href: Some("/page/3".into()),
            disabled: false,
        };
        let disabled = NextControl {
            href: Some("/page/3".into()),
            disabled: true,
        };
        assert!(should_continue(1, 5, 20, Some(&enabled)));
        assert!(!should_continue(1, 5, 20, Some(&disabled)));
        assert!(!should_continue(5, 5, 20, Some(&enabled)));
        assert!(!should_continue(1, 5, 0, Some(&enabled)));
        assert!(!should_continue(1, 5, 20, None));
    }

    #[test]
    fn test_find_next_control_variants() {
        let doc = Html::parse_document(
            r#"<ul class="pagination"><li class="next"><a href="/p2">Next</a></li></ul>"#,
        );
        let ctl = find_next_control(&doc).unwrap();
        assert_eq!(ctl.href.as_deref(), Some("/p2"));
        assert!(!ctl.disabled);

        let doc = Html::parse_document(
            r#"<ul><li class="next disabled"><a href="/p3">Next</a></li></ul>"#,
        );
        assert!(find_next_control(&doc).unwrap().disabled);

        let doc = Html::parse_document(r#"<div><a href="/p2">Next</a></div>"#);
        let ctl = find_next_control(&doc).unwrap();
        assert_eq!(ctl.href.as_deref(), Some("/p2"));

        let doc = Html::parse_document("<p>no pagination here</p>");
        assert!(find_next_control(&doc).is_none());
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://www.tenders.gov.au", "/Atm/Show/abc"),
            "https://www.tenders.gov.au/Atm/Show/abc"
        );
        assert_eq!(
            resolve_url("https://www.tenders.gov.au", "https://other.gov.au/x"),
            "https://other.gov.au/x"
        );
    }

    #[test]
    fn test_filter_fallback_returns_unfiltered_when_nothing_matches() {
        let raw: Vec<TenderResult> = (0..5)
            .map(|i| tender(&format!("Road resurfacing package {:02}", i), None))
            .collect();
        let out = filter_with_fallback("austender", raw.clone());
        assert_eq!(out, raw);
    }

    #[test]
    fn test_filter_keeps_only_matches_when_some_match() {
        let raw = vec![
            tender("Hospital linen services", None),
            tender("Road resurfacing package", None),
        ];
        let out = filter_with_fallback("austender", raw);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Hospital linen services");
    }

    #[test]
    fn test_finalize_rejects_bad_titles_and_synthesizes_references() {
        let cfg = crate::config::portal_configs()
            .into_iter()
            .find(|p| p.key == "austender")
            .unwrap();

        assert!(finalize(
            RawListing {
                title: "Full Details".into(),
                ..RawListing::default()
            },
            &cfg
        )
        .is_none());

        let t = finalize(
            RawListing {
                title: "Provision of radiology services".into(),
                href: Some("/Atm/Show/xyz".into()),
                close_date_text: Some("15 Mar 2026".into()),
                ..RawListing::default()
            },
            &cfg,
        )
        .unwrap();
        assert!(t.tender_reference.starts_with("AUSTENDER-"));
        assert_eq!(t.issuing_body, "Australian Government");
        assert_eq!(t.close_date.as_deref(), Some("2026-03-15"));
        assert_eq!(t.source_url, "https://www.tenders.gov.au/Atm/Show/xyz");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_content_ready_after_reloads() {
        let mut page = MockPage::new().route_sequence(
            "https://spa.example/search",
            &[
                "<div id='app'></div>",
                "<div id='app'></div>",
                "<div id='app'><div class='result-card'>x</div></div>",
            ],
        );
        page.goto("https://spa.example/search").await.unwrap();

        let outcome = wait_for_content(
            &mut page,
            |html| html.contains("result-card"),
            2,
            Duration::from_secs(15),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_content_times_out_without_hanging() {
        let mut page = MockPage::new().route("https://spa.example/search", "<div id='app'></div>");
        page.goto("https://spa.example/search").await.unwrap();

        let outcome = wait_for_content(
            &mut page,
            |html| html.contains("never-appears"),
            2,
            Duration::from_secs(15),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
