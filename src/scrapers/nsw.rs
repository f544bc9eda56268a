//! NSW eTendering (tenders.nsw.gov.au).
//!
//! Client-rendered SPA: at DOMContentLoaded the page is an empty shell and a
//! naive parse sees nothing. We poll until a readiness condition holds —
//! result rows/cards present, or an explicit "no results" message — then run
//! the selector-family fallback chain, most structured family first. Timeout
//! degrades to a best-effort parse of whatever shell exists, which normally
//! yields zero rows and an empty (not failed) run.

use crate::browser::Page;
use crate::config::{AppConfig, HttpConfig, PortalConfig};
use crate::models::{RawListing, TenderResult};
use crate::scrapers::{
    debug_snapshot, element_text, filter_with_fallback, finalize, find_next_control, human_delay,
    resolve_url, run_strategies, should_continue, wait_for_content, PortalScraper, WaitOutcome,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const READY_RETRIES: u32 = 2;
const READY_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct NswScraper {
    cfg: PortalConfig,
    http: HttpConfig,
    snapshot_dir: PathBuf,
}

impl NswScraper {
    pub fn new(cfg: PortalConfig, app: &AppConfig) -> Self {
        Self {
            cfg,
            http: app.http.clone(),
            snapshot_dir: app.debug.snapshot_dir.clone(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/supplier/tender/search?status=open", self.cfg.base_url)
    }
}

#[async_trait]
impl PortalScraper for NswScraper {
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
            .context("NSW search navigation failed")?;

        let mut raw_all: Vec<RawListing> = Vec::new();
        let mut page_num = 1u32;

        loop {
            let outcome =
                wait_for_content(page, results_ready, READY_RETRIES, READY_ATTEMPT_TIMEOUT).await;
            if outcome == WaitOutcome::TimedOut {
                warn!("{}: results never became ready — attempting degraded parse", self.cfg.key);
                debug_snapshot(
                    page,
                    &self.snapshot_dir,
                    self.cfg.key,
                    &format!("not-ready-page-{page_num}"),
                )
                .await;
            }

            let (listings, next, no_results) = {
                let doc = Html::parse_document(page.content());
                let listings = run_strategies(
                    self.cfg.key,
                    &doc,
                    &[
                        ("data-attributes", extract_data_attr_results),
                        ("table-rows", extract_table_rows),
                        ("result-cards", extract_cards),
                    ],
                );
                let next = find_next_control(&doc);
                (listings, next, has_no_results_text(page.content()))
            };

            if listings.is_empty() && no_results {
                info!("{}: portal reports no open tenders", self.cfg.key);
            }

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

// ── Readiness ─────────────────────────────────────────────────────────────────

/// The SPA is ready when either actual result elements exist or the explicit
/// empty-state message has rendered.
fn results_ready(html: &str) -> bool {
    if has_no_results_text(html) {
        return true;
    }
    let doc = Html::parse_document(html);
    for sel_str in ["[data-tender-id]", "table tbody tr", ".search-result, .tender-card"] {
        if let Ok(sel) = Selector::parse(sel_str) {
            if doc.select(&sel).next().is_some() {
                return true;
            }
        }
    }
    false
}

fn has_no_results_text(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("no results found")
        || lower.contains("no tenders found")
        || lower.contains("your search returned no")
}

// ── Extraction strategies, most structured first ──────────────────────────────

fn extract_data_attr_results(doc: &Html) -> Vec<RawListing> {
    let Ok(item_sel) = Selector::parse("[data-tender-id]") else {
        return Vec::new();
    };
    let Ok(title_sel) = Selector::parse("h2, h3, .tender-title, a") else {
        return Vec::new();
    };
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let Ok(agency_sel) = Selector::parse(".agency-name, .buyer, [data-agency]") else {
        return Vec::new();
    };

    let mut listings = Vec::new();
    for item in doc.select(&item_sel) {
        let reference = item
            .value()
            .attr("data-tender-id")
            .map(|r| r.to_string())
            .filter(|r| !r.is_empty());

        let Some(title_el) = item.select(&title_sel).next() else {
            continue;
        };

        let close_date_text = item
            .value()
            .attr("data-close-date")
            .map(|d| d.to_string())
            .or_else(|| mine_after(&element_text(&item), &["Closing:", "Closes:", "Close date:"]));

        listings.push(RawListing {
            reference,
            title: element_text(&title_el),
            agency: item.select(&agency_sel).next().map(|el| element_text(&el)),
            description: None,
            close_date_text,
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
                .find(|c| {
                    c.starts_with("RFT") || c.starts_with("EOI") || c.starts_with("DPC")
                })
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
    let Ok(card_sel) = Selector::parse(".search-result, .tender-card, article") else {
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
            close_date_text: mine_after(&text, &["Closing:", "Closes:", "Close date:"]),
            href: card
                .select(&a_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.to_string()),
        });
    }
    listings
}

/// Take a short run of text after the first matching label, enough to hold a
/// date in any of the portal's formats.
fn mine_after(text: &str, labels: &[&str]) -> Option<String> {
    for label in labels {
        if let Some(rest) = text.split(label).nth(1) {
            return Some(rest.trim().chars().take(24).collect());
        }
    }
    None
}
