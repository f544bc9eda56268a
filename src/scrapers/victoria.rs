//! Buying for Victoria (tenders.vic.gov.au).
//!
//! The one portal that actively blocks automated clients: the search route
//! intermittently returns 403 to anything that doesn't look like a browser
//! mid-session. Mitigations are defensive, not deterministic — realistic
//! headers and pacing come from the shared HTTP page; here we add the
//! alternate navigation path (homepage first, then search, the way a person
//! arrives) and treat a still-blocked outcome as a zero-result run rather
//! than a failure, so operators can tell "blocked" apart from "broken".

use crate::browser::{Page, PageError};
use crate::config::{AppConfig, HttpConfig, PortalConfig};
use crate::models::{RawListing, TenderResult};
use crate::scrapers::{
    debug_snapshot, element_text, filter_with_fallback, finalize, find_next_control, human_delay,
    resolve_url, run_strategies, should_continue, PortalScraper,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::path::PathBuf;
use tracing::warn;

pub struct VictoriaScraper {
    cfg: PortalConfig,
    http: HttpConfig,
    snapshot_dir: PathBuf,
}

impl VictoriaScraper {
    pub fn new(cfg: PortalConfig, app: &AppConfig) -> Self {
        Self {
            cfg,
            http: app.http.clone(),
            snapshot_dir: app.debug.snapshot_dir.clone(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/tender/search?preset=open", self.cfg.base_url)
    }

    /// Navigate to the search page, falling back to the homepage route when
    /// the direct path is blocked. `Ok(false)` means "likely blocked" — the
    /// caller reports zero results, not an error.
    async fn navigate_with_fallback(&self, page: &mut dyn Page) -> Result<bool> {
        let search = self.search_url();

        human_delay(self.http.delay_min_ms, self.http.delay_max_ms).await;
        match page.goto(&search).await {
            Ok(()) => return Ok(true),
            Err(PageError::Blocked { .. }) => {
                warn!("{}: direct search route blocked — retrying via homepage", self.cfg.key);
            }
            Err(e) => return Err(e).context("Victoria search navigation failed"),
        }

        // Arrive the way a person does: homepage first, linger, then search.
        human_delay(self.http.delay_min_ms * 2, self.http.delay_max_ms * 2).await;
        if let Err(e) = page.goto(self.cfg.base_url).await {
            warn!("{}: homepage also unreachable ({}) — likely blocked", self.cfg.key, e);
            return Ok(false);
        }

        human_delay(self.http.delay_min_ms * 2, self.http.delay_max_ms * 2).await;
        match page.goto(&search).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(
                    "{}: search blocked after homepage fallback ({}) — likely blocked, reporting zero results",
                    self.cfg.key, e
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl PortalScraper for VictoriaScraper {
    fn key(&self) -> &'static str {
        self.cfg.key
    }

    fn display_name(&self) -> &'static str {
        self.cfg.display_name
    }

    async fn scrape(&self, page: &mut dyn Page) -> Result<Vec<TenderResult>> {
        if !self.navigate_with_fallback(page).await? {
            return Ok(Vec::new());
        }

        let mut raw_all: Vec<RawListing> = Vec::new();
        let mut page_num = 1u32;

        loop {
            let (listings, next) = {
                let doc = Html::parse_document(page.content());
                let listings = run_strategies(
                    self.cfg.key,
                    &doc,
                    &[
                        ("tender-rows", extract_table_rows),
                        ("result-cards", extract_cards),
                    ],
                );
                let next = find_next_control(&doc);
                (listings, next)
            };

            if listings.is_empty() {
                debug_snapshot(
                    page,
                    &self.snapshot_dir,
                    self.cfg.key,
                    &format!("empty-page-{page_num}"),
                )
                .await;
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
            match page.goto(&next_url).await {
                Ok(()) => page_num += 1,
                Err(e) => {
                    // Mid-pagination blocks happen; keep what we have.
                    warn!("{}: pagination to {} failed: {}", self.cfg.key, next_url, e);
                    break;
                }
            }
        }

        let results: Vec<TenderResult> = raw_all
            .into_iter()
            .filter_map(|r| finalize(r, &self.cfg))
            .collect();

        Ok(filter_with_fallback(self.cfg.key, results))
    }
}

// ── Extraction strategies ─────────────────────────────────────────────────────

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
        let title = element_text(&anchor);
        let href = anchor.value().attr("href").map(|h| h.to_string());

        let cells: Vec<String> = tr.select(&td_sel).map(|td| element_text(&td)).collect();

        // Dates are code-shaped too ("25/12/2026"), so rule them out first.
        let reference = cells
            .iter()
            .find(|c| looks_like_code(c) && crate::dates::normalize_date(Some(c.as_str())).is_none())
            .cloned();
        let close_date_text = cells
            .iter()
            .find(|c| crate::dates::normalize_date(Some(c.as_str())).is_some())
            .cloned();
        let agency = cells
            .iter()
            .find(|c| {
                c.as_str() != title
                    && c.len() > 5
                    && !looks_like_code(c)
                    && crate::dates::normalize_date(Some(c.as_str())).is_none()
            })
            .cloned();

        listings.push(RawListing {
            reference,
            title,
            agency,
            description: None,
            close_date_text,
            href,
        });
    }
    listings
}

fn extract_cards(doc: &Html) -> Vec<RawListing> {
    let Ok(card_sel) = Selector::parse(".search-result, .tender-display-card, article") else {
        return Vec::new();
    };
    let Ok(title_sel) = Selector::parse("h2 a, h3 a, h2, h3") else {
        return Vec::new();
    };
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let Ok(agency_sel) = Selector::parse(".agency, .organisation, .department") else {
        return Vec::new();
    };

    let mut listings = Vec::new();
    for card in doc.select(&card_sel) {
        let Some(title_el) = card.select(&title_sel).next() else {
            continue;
        };
        let title = element_text(&title_el);
        let href = card
            .select(&a_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|h| h.to_string());
        let agency = card.select(&agency_sel).next().map(|el| element_text(&el));

        let text = element_text(&card);
        let close_date_text = text
            .split("Closing date:")
            .nth(1)
            .or_else(|| text.split("Closes:").nth(1))
            .map(|rest| rest.trim().chars().take(24).collect::<String>());

        listings.push(RawListing {
            reference: None,
            title,
            agency,
            description: None,
            close_date_text,
            href,
        });
    }
    listings
}

/// Tender codes look like "HPV/2026-014" or "CPV123456": short, upper-case,
/// with at least one digit.
fn looks_like_code(s: &str) -> bool {
    let t = s.trim();
    (3..=24).contains(&t.len())
        && t.chars().any(|c| c.is_ascii_digit())
        && t.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || "-/.".contains(c))
}
