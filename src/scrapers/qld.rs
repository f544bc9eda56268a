//! QTenders (Queensland) — a Blazor WebAssembly app, the heaviest client
//! rendering of the lot.
//!
//! Nothing exists in the DOM until the WASM runtime finishes bootstrapping,
//! which routinely takes 10–20 seconds. Readiness is therefore its own check,
//! distinct from the generic SPA wait: a Blazor runtime marker, OR rendered
//! child content inside the app root, OR Blazor's synthetic DOM attributes.
//! After that it's the usual selector-family fallback chain.

use crate::browser::Page;
use crate::config::{AppConfig, HttpConfig, PortalConfig};
use crate::models::{RawListing, TenderResult};
use crate::scrapers::{
    debug_snapshot, element_text, filter_with_fallback, finalize, find_next_control, human_delay,
    resolve_url, run_strategies, should_continue, wait_for_content, PortalScraper, WaitOutcome,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

const BLAZOR_RETRIES: u32 = 2;
/// Per-attempt budget sized to the observed WASM bootstrap time.
const BLAZOR_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);

pub struct QldScraper {
    cfg: PortalConfig,
    http: HttpConfig,
    snapshot_dir: PathBuf,
}

impl QldScraper {
    pub fn new(cfg: PortalConfig, app: &AppConfig) -> Self {
        Self {
            cfg,
            http: app.http.clone(),
            snapshot_dir: app.debug.snapshot_dir.clone(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/qtenders/tender/search?preset=open", self.cfg.base_url)
    }
}

#[async_trait]
impl PortalScraper for QldScraper {
    fn key(&self) -> &'static str {
        self.cfg.key
    }

    fn display_name(&self) -> &'static str {
        self.cfg.display_name
    }

    async fn scrape(&self, page: &mut dyn Page) -> Result<Vec<TenderResult>> {
        human_delay(self.http.delay_min_ms, self.http.delay_max_ms).await;
        page.goto(&self.search_url())
            .await
            .context("QTenders search navigation failed")?;

        let mut raw_all: Vec<RawListing> = Vec::new();
        let mut page_num = 1u32;

        loop {
            let outcome =
                wait_for_content(page, blazor_ready, BLAZOR_RETRIES, BLAZOR_ATTEMPT_TIMEOUT).await;
            if outcome == WaitOutcome::TimedOut {
                warn!(
                    "{}: Blazor runtime never became ready — attempting degraded parse",
                    self.cfg.key
                );
                debug_snapshot(
                    page,
                    &self.snapshot_dir,
                    self.cfg.key,
                    &format!("blazor-not-ready-page-{page_num}"),
                )
                .await;
            }

            let (listings, next) = {
                let doc = Html::parse_document(page.content());
                let listings = run_strategies(
                    self.cfg.key,
                    &doc,
                    &[
                        ("tender-list-items", extract_list_items),
                        ("table-rows", extract_table_rows),
                        ("generic-cards", extract_cards),
                    ],
                );
                let next = find_next_control(&doc);
                (listings, next)
            };

            let page_yield = listings.len();
            raw_all.extend(listings);

            if !should_continue(page_num, self.cfg.max_pages, page_yield, next.as_ref()) {
                break;
            }
            let Some(href) = next.and_then(|n| n.href) else {
                break;
            };

            human_delay(self.http.delay_min_ms, self.http.delay_max_ms).await;
            let next_url = resolve_url(self.cfg.base_url, &href);
            if let Err(e) = page.goto(&next_url).await {
                warn!("{}: pagination to {} failed: {}", self.cfg.key, next_url, e);
                break;
            }
            page_num += 1;
        }

        let results: Vec<TenderResult> = raw_all
            .into_iter()
            .filter_map(|r| finalize(r, &self.cfg))
            .collect();

        Ok(filter_with_fallback(self.cfg.key, results))
    }
}

// ── Blazor readiness ──────────────────────────────────────────────────────────

fn blazor_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Blazor stamps elements with synthetic attributes: _bl_<n> element
    // references and b-<hash> scoped-CSS markers.
    RE.get_or_init(|| Regex::new(r#"\b(?:_bl_\d+|b-[a-z0-9]{10})\b"#).expect("blazor attr regex"))
}

/// Ready when any of the three bootstrap signals is present.
pub(crate) fn blazor_ready(html: &str) -> bool {
    if html.contains("window.Blazor") || blazor_attr_re().is_match(html) {
        return true;
    }

    // Rendered child content: the app root contains something beyond a
    // loading placeholder.
    let doc = Html::parse_document(html);
    let Ok(app_sel) = Selector::parse("#app > *, app > *") else {
        return false;
    };
    for child in doc.select(&app_sel) {
        let classes = child.value().attr("class").unwrap_or_default();
        if classes.contains("loading") || classes.contains("spinner") {
            continue;
        }
        if element_text(&child).len() > 20 {
            return true;
        }
    }
    false
}

// ── Extraction strategies ─────────────────────────────────────────────────────

fn extract_list_items(doc: &Html) -> Vec<RawListing> {
    let Ok(item_sel) = Selector::parse("li.tender-item, div.tender-summary") else {
        return Vec::new();
    };
    let Ok(title_sel) = Selector::parse("h2 a, h3 a, .tender-title, h2, h3") else {
        return Vec::new();
    };
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let Ok(agency_sel) = Selector::parse(".agency, .issuing-agency, .department") else {
        return Vec::new();
    };

    let mut listings = Vec::new();
    for item in doc.select(&item_sel) {
        let Some(title_el) = item.select(&title_sel).next() else {
            continue;
        };
        let text = element_text(&item);

        listings.push(RawListing {
            reference: mine_token_after(&text, &["Tender No:", "Number:", "Ref:"]),
            title: element_text(&title_el),
            agency: item.select(&agency_sel).next().map(|el| element_text(&el)),
            description: None,
            close_date_text: mine_after(&text, &["Closing Date:", "Closes:", "Close:"]),
            href: item
                .select(&a_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.to_string()),
        });
    }
    listings
}

fn extract_table_rows(doc: &Html) -> Vec<RawListing> {
    let Ok(tr_sel) = Selector::parse("table tbody tr") else {
        return Vec::new();
    };
    let Ok(td_sel) = Selector::parse("td") else {
        return Vec::new();
    };
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut listings = Vec::new();
    for tr in doc.select(&tr_sel) {
        let Some(anchor) = tr.select(&a_sel).next() else {
            continue;
        };
        let cells: Vec<String> = tr.select(&td_sel).map(|td| element_text(&td)).collect();

        listings.push(RawListing {
            reference: cells
                .iter()
                .find(|c| c.len() <= 20 && c.chars().any(|ch| ch.is_ascii_digit())
                    && crate::dates::normalize_date(Some(c.as_str())).is_none())
                .cloned(),
            title: element_text(&anchor),
            agency: None,
            description: None,
            close_date_text: cells
                .iter()
                .find(|c| crate::dates::normalize_date(Some(c.as_str())).is_some())
                .cloned(),
            href: anchor.value().attr("href").map(|h| h.to_string()),
        });
    }
    listings
}

fn extract_cards(doc: &Html) -> Vec<RawListing> {
    let Ok(card_sel) = Selector::parse("article, .card, .search-result") else {
        return Vec::new();
    };
    let Ok(title_sel) = Selector::parse("h2 a, h3 a, h2, h3") else {
        return Vec::new();
    };
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut listings = Vec::new();
    for card in doc.select(&card_sel) {
        let Some(title_el) = card.select(&title_sel).next() else {
            continue;
        };
        let text = element_text(&card);

        listings.push(RawListing {
            reference: None,
            title: element_text(&title_el),
            agency: None,
            description: None,
            close_date_text: mine_after(&text, &["Closing Date:", "Closes:"]),
            href: card
                .select(&a_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.to_string()),
        });
    }
    listings
}

fn mine_after(text: &str, labels: &[&str]) -> Option<String> {
    for label in labels {
        if let Some(rest) = text.split(label).nth(1) {
            return Some(rest.trim().chars().take(24).collect());
        }
    }
    None
}

/// Like `mine_after` but stops at the first whitespace — for single-token
/// values such as tender numbers.
fn mine_token_after(text: &str, labels: &[&str]) -> Option<String> {
    for label in labels {
        if let Some(rest) = text.split(label).nth(1) {
            return rest.split_whitespace().next().map(|t| t.to_string());
        }
    }
    None
}
