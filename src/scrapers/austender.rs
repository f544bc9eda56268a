//! AusTender (tenders.gov.au) — the federal portal.
//!
//! Server-rendered and stable, but the listing markup is label-soup: the only
//! reliable hook is the detail-page anchor (`/Atm/Show/{guid}` for open
//! approaches to market, `/Cn/Show/{id}` for contract notices). We walk up
//! from each anchor to its containing block and mine the labelled fields
//! ("Agency:", "Description:", "Close Date:") out of the block text, because
//! the portal does not put them in consistent elements.

use crate::browser::Page;
use crate::config::{AppConfig, HttpConfig, PortalConfig};
use crate::models::{RawListing, TenderResult};
use crate::scrapers::{
    debug_snapshot, element_text, filter_with_fallback, finalize, find_next_control, human_delay,
    resolve_url, run_strategies, should_continue, PortalScraper,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

pub struct AusTenderScraper {
    cfg: PortalConfig,
    http: HttpConfig,
    snapshot_dir: PathBuf,
}

impl AusTenderScraper {
    pub fn new(cfg: PortalConfig, app: &AppConfig) -> Self {
        Self {
            cfg,
            http: app.http.clone(),
            snapshot_dir: app.debug.snapshot_dir.clone(),
        }
    }

    fn listing_url(&self) -> String {
        format!("{}/atm", self.cfg.base_url)
    }
}

#[async_trait]
impl PortalScraper for AusTenderScraper {
    fn key(&self) -> &'static str {
        self.cfg.key
    }

    fn display_name(&self) -> &'static str {
        self.cfg.display_name
    }

    async fn scrape(&self, page: &mut dyn Page) -> Result<Vec<TenderResult>> {
        human_delay(self.http.delay_min_ms, self.http.delay_max_ms).await;
        page.goto(&self.listing_url())
            .await
            .context("AusTender listing navigation failed")?;

        let mut raw_all: Vec<RawListing> = Vec::new();
        let mut page_num = 1u32;

        loop {
            // Html is not Send; keep it scoped so no await sees it.
            let (listings, next) = {
                let doc = Html::parse_document(page.content());
                let listings = run_strategies(self.cfg.key, &doc, &[("atm-anchors", extract_listings)]);
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
            if let Err(e) = page.goto(&next_url).await {
                // Keep whatever earlier pages yielded.
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

// ── Extraction ────────────────────────────────────────────────────────────────

fn detail_href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/(?:Atm|Cn)/Show/([A-Za-z0-9][A-Za-z0-9\.\-]*)").expect("atm href regex")
    })
}

fn extract_listings(doc: &Html) -> Vec<RawListing> {
    let Ok(a_sel) = Selector::parse(r#"a[href*="/Atm/Show/"], a[href*="/Cn/Show/"]"#) else {
        return Vec::new();
    };

    let mut listings = Vec::new();
    for anchor in doc.select(&a_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(reference) = detail_href_re()
            .captures(href)
            .map(|c| c[1].to_string())
        else {
            continue;
        };

        let title = element_text(&anchor);
        let block_text = containing_block_text(&anchor);

        listings.push(RawListing {
            reference: Some(reference),
            title,
            agency: mine_label(&block_text, agency_re()),
            description: mine_label(&block_text, description_re()),
            close_date_text: mine_label(&block_text, close_date_re()),
            href: Some(href.to_string()),
        });
    }
    listings
}

/// Walk up from the anchor until we hit a block with enough surrounding text
/// to mine labels from. Four levels is as far as the listing nesting goes;
/// past that we'd start swallowing neighboring rows.
fn containing_block_text(anchor: &ElementRef<'_>) -> String {
    let mut best = element_text(anchor);
    for ancestor in anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(4)
    {
        let text = element_text(&ancestor);
        if text.len() >= 40 {
            return text;
        }
        best = text;
    }
    best
}

// Labelled fields sit in flat text, so each label is mined independently:
// capture up to the next known label or end of block. The terminator must be
// the explicit label set — a generic "capitalized word + colon" rule bites
// chunks out of agency names like "Department of Health and Aged Care".

const LABEL_TERMINATOR: &str =
    r"(?:\s+(?:Agency|Description|Close Date(?: & Time)?|Category|Location|ATM ID|CN ID|Publish Date):|$)";

fn agency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"Agency:\s*(.+?){LABEL_TERMINATOR}")).expect("agency regex")
    })
}

fn description_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"Description:\s*(.+?){LABEL_TERMINATOR}")).expect("description regex")
    })
}

fn close_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"Close Date(?: & Time)?:\s*(.+?){LABEL_TERMINATOR}"))
            .expect("close date regex")
    })
}

fn mine_label(text: &str, re: &Regex) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockPage;
    use crate::config::portal_configs;

    fn app_config() -> AppConfig {
        AppConfig::default()
    }

    fn austender_cfg() -> PortalConfig {
        portal_configs()
            .into_iter()
            .find(|p| p.key == "austender")
            .unwrap()
    }

    const LISTING_PAGE: &str = r#"
        <html><body>
        <div class="list-desc">
            <a href="/Atm/Show/9f2c1a4e-1111-2222-3333-444455556666">
                Provision of hospital cleaning services
            </a>
            <p>Agency: Department of Health and Aged Care</p>
            <p>Close Date: 15 Mar 2026</p>
            <p>Description: Cleaning for metropolitan hospital campuses</p>
        </div>
        <div class="list-desc">
            <a href="/Atm/Show/aa11bb22-cc33-dd44-ee55-ff6677889900">ICT12345</a>
            <p>Agency: Digital Transformation Agency</p>
        </div>
        <div class="list-desc">
            <a href="/Cn/Show/CN4040123">Medical imaging equipment maintenance</a>
            <p>Agency: Services Australia</p>
        </div>
        </body></html>
    "#;

    #[test]
    fn test_label_mining() {
        let text = "Agency: Department of Health and Aged Care Close Date: 15 Mar 2026 \
                    Description: Cleaning for hospital campuses";
        assert_eq!(
            mine_label(text, agency_re()).as_deref(),
            Some("Department of Health and Aged Care")
        );
        assert_eq!(
            mine_label(text, close_date_re()).as_deref(),
            Some("15 Mar 2026")
        );
        assert_eq!(
            mine_label(text, description_re()).as_deref(),
            Some("Cleaning for hospital campuses")
        );
        assert_eq!(mine_label("no labels here", agency_re()), None);
    }

    #[test]
    fn test_reference_extraction_from_hrefs() {
        let re = detail_href_re();
        assert_eq!(
            &re.captures("/Atm/Show/9f2c1a4e-1111").unwrap()[1],
            "9f2c1a4e-1111"
        );
        assert_eq!(&re.captures("/Cn/Show/CN4040123.A").unwrap()[1], "CN4040123.A");
        assert!(re.captures("/Atm/List").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_drops_short_titles_and_parses_close_dates() {
        let cfg = austender_cfg();
        let scraper = AusTenderScraper::new(cfg, &app_config());
        let mut page = MockPage::new().route("https://www.tenders.gov.au/atm", LISTING_PAGE);

        let results = scraper.scrape(&mut page).await.unwrap();

        // Three anchors on the page; "ICT12345" is not a plausible title.
        assert_eq!(results.len(), 2);

        let cleaning = results
            .iter()
            .find(|t| t.title.contains("cleaning"))
            .unwrap();
        assert_eq!(cleaning.close_date.as_deref(), Some("2026-03-15"));
        assert_eq!(cleaning.issuing_body, "Department of Health and Aged Care");
        assert_eq!(
            cleaning.tender_reference,
            "9f2c1a4e-1111-2222-3333-444455556666"
        );
        assert!(cleaning
            .source_url
            .starts_with("https://www.tenders.gov.au/Atm/Show/"));

        let imaging = results
            .iter()
            .find(|t| t.title.contains("imaging"))
            .unwrap();
        assert_eq!(imaging.close_date, None);
        assert_eq!(imaging.tender_reference, "CN4040123");
        assert_eq!(imaging.portal, "austender");
        assert_eq!(imaging.region, "Australia");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_stops_when_next_disabled() {
        let page_one = format!(
            r#"{}<ul class="pagination"><li class="next"><a href="/atm?page=2">Next</a></li></ul>"#,
            LISTING_PAGE
        );
        let page_two = format!(
            r#"{}<ul class="pagination"><li class="next disabled"><a href="/atm?page=3">Next</a></li></ul>"#,
            LISTING_PAGE
        );

        let cfg = austender_cfg();
        assert_eq!(cfg.max_pages, 5);
        let scraper = AusTenderScraper::new(cfg, &app_config());
        let mut page = MockPage::new()
            .route("https://www.tenders.gov.au/atm", &page_one)
            .route("https://www.tenders.gov.au/atm?page=2", &page_two);

        let results = scraper.scrape(&mut page).await.unwrap();

        // Two listing pages visited, never a third despite max_pages = 5.
        assert_eq!(page.visits.len(), 2);
        assert_eq!(
            page.visits[1],
            "https://www.tenders.gov.au/atm?page=2"
        );
        assert_eq!(results.len(), 4);
    }
}
