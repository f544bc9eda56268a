//! NZ GETS (gets.govt.nz) — the Government Electronic Tender Service.
//!
//! Server-rendered, but there is no "browse everything" view: results only
//! exist per search query. We issue one search per configured keyword and
//! accumulate into a run-scoped de-dup set keyed by reference, because the
//! same tender legitimately appears under several keywords within one run.
//! That set is independent of the cross-run dedup the persistence layer does.
//!
//! Close dates arrive as locale timestamps ("2:00 PM 13 Feb 2026 (NZDT)"), so
//! a portal-specific pre-pass runs before the generic normalizer.

use crate::browser::Page;
use crate::config::{AppConfig, HttpConfig, PortalConfig};
use crate::dates::normalize_nz_date;
use crate::models::{RawListing, TenderResult};
use crate::scrapers::{
    debug_snapshot, element_text, filter_with_fallback, finalize, find_next_control, human_delay,
    resolve_url, run_strategies, should_continue, PortalScraper,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

pub struct NzGetsScraper {
    cfg: PortalConfig,
    http: HttpConfig,
    snapshot_dir: PathBuf,
}

impl NzGetsScraper {
    pub fn new(cfg: PortalConfig, app: &AppConfig) -> Self {
        Self {
            cfg,
            http: app.http.clone(),
            snapshot_dir: app.debug.snapshot_dir.clone(),
        }
    }

    fn search_url(&self, keyword: &str) -> String {
        let mut url = match url::Url::parse(self.cfg.base_url) {
            Ok(u) => u,
            Err(_) => return self.cfg.base_url.to_string(),
        };
        url.set_path("/ExternalIndex/SearchResults");
        url.query_pairs_mut().append_pair("searchString", keyword);
        url.to_string()
    }

    /// One keyword search, paginated. Appends finalized results not already
    /// seen this run.
    async fn search_keyword(
        &self,
        page: &mut dyn Page,
        keyword: &str,
        seen: &mut HashSet<String>,
        out: &mut Vec<TenderResult>,
    ) -> Result<()> {
        human_delay(self.http.delay_min_ms, self.http.delay_max_ms).await;
        page.goto(&self.search_url(keyword))
            .await
            .map_err(|e| anyhow!("GETS search for '{}' failed: {}", keyword, e))?;

        let mut page_num = 1u32;
        loop {
            let (listings, next) = {
                let doc = Html::parse_document(page.content());
                let listings = run_strategies(
                    self.cfg.key,
                    &doc,
                    &[
                        ("results-table", extract_table_rows),
                        ("result-cards", extract_cards),
                    ],
                );
                let next = find_next_control(&doc);
                (listings, next)
            };

            if listings.is_empty() && page_num == 1 {
                debug_snapshot(
                    page,
                    &self.snapshot_dir,
                    self.cfg.key,
                    &format!("empty-{keyword}"),
                )
                .await;
            }

            let page_yield = listings.len();
            for mut raw in listings {
                // Pre-pass the locale timestamp into ISO; the generic
                // normalizer then takes it verbatim.
                raw.close_date_text = normalize_nz_date(raw.close_date_text.as_deref());
                if let Some(tender) = finalize(raw, &self.cfg) {
                    if seen.insert(tender.tender_reference.clone()) {
                        out.push(tender);
                    }
                }
            }

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
        Ok(())
    }
}

#[async_trait]
impl PortalScraper for NzGetsScraper {
    fn key(&self) -> &'static str {
        self.cfg.key
    }

    fn display_name(&self) -> &'static str {
        self.cfg.display_name
    }

    async fn scrape(&self, page: &mut dyn Page) -> Result<Vec<TenderResult>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut results: Vec<TenderResult> = Vec::new();
        let mut failed_searches = 0usize;

        for keyword in self.cfg.search_keywords {
            if let Err(e) = self.search_keyword(page, keyword, &mut seen, &mut results).await {
                // One bad search must not sink the others.
                warn!("{}: {}", self.cfg.key, e);
                failed_searches += 1;
            }
        }

        if failed_searches == self.cfg.search_keywords.len() && !self.cfg.search_keywords.is_empty()
        {
            return Err(anyhow!(
                "all {} GETS keyword searches failed",
                failed_searches
            ));
        }

        Ok(filter_with_fallback(self.cfg.key, results))
    }
}

// ── Extraction ────────────────────────────────────────────────────────────────

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

        // GETS rows lead with the RFx reference ("RFT-12345", "GETS-99-1").
        let reference = cells
            .first()
            .filter(|c| {
                (4..=20).contains(&c.len())
                    && c.chars().any(|ch| ch.is_ascii_digit())
                    && !c.contains(' ')
            })
            .cloned();

        // The close column is a locale timestamp, left raw here; the caller
        // runs the NZ pre-pass.
        let close_date_text = cells
            .iter()
            .find(|c| c.contains("AM") || c.contains("PM") || c.contains("NZDT") || c.contains("NZST"))
            .cloned();

        let title = element_text(&anchor);
        let agency = cells
            .iter()
            .find(|c| {
                c.len() > 8
                    && c.as_str() != title
                    && !c.chars().any(|ch| ch.is_ascii_digit())
            })
            .cloned();

        listings.push(RawListing {
            reference,
            title,
            agency,
            description: None,
            close_date_text,
            href: anchor.value().attr("href").map(|h| h.to_string()),
        });
    }
    listings
}

fn extract_cards(doc: &Html) -> Vec<RawListing> {
    let Ok(card_sel) = Selector::parse(".tender-result, article, .result") else {
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
        let close_date_text = text
            .split("Close Date:")
            .nth(1)
            .map(|rest| rest.trim().chars().take(32).collect::<String>());

        listings.push(RawListing {
            reference: None,
            title: element_text(&title_el),
            agency: None,
            description: None,
            close_date_text,
            href: card
                .select(&a_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.to_string()),
        });
    }
    listings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockPage;
    use crate::config::portal_configs;

    fn scraper_with_keywords() -> NzGetsScraper {
        let mut cfg = portal_configs().into_iter().find(|p| p.key == "nz-gets").unwrap();
        cfg.search_keywords = &["health", "hospital"];
        NzGetsScraper::new(cfg, &AppConfig::default())
    }

    const HEALTH_URL: &str =
        "https://www.gets.govt.nz/ExternalIndex/SearchResults?searchString=health";
    const HOSPITAL_URL: &str =
        "https://www.gets.govt.nz/ExternalIndex/SearchResults?searchString=hospital";

    // The shared listing appears in both searches under the same reference.
    const HEALTH_RESULTS: &str = r#"
        <table><tbody>
            <tr>
                <td>RFT-30211</td>
                <td><a href="/ExternalTenderDetails.htm?id=30211">National health workforce planning tools</a></td>
                <td>Te Whatu Ora</td>
                <td>2:00 PM 13 Feb 2026 (NZDT)</td>
            </tr>
            <tr>
                <td>RFT-30300</td>
                <td><a href="/ExternalTenderDetails.htm?id=30300">Primary care data warehouse services</a></td>
                <td>Ministry of Health</td>
                <td>11:00 AM 2 Apr 2026 (NZST)</td>
            </tr>
        </tbody></table>
    "#;

    const HOSPITAL_RESULTS: &str = r#"
        <table><tbody>
            <tr>
                <td>RFT-30211</td>
                <td><a href="/ExternalTenderDetails.htm?id=30211">National health workforce planning tools</a></td>
                <td>Te Whatu Ora</td>
                <td>2:00 PM 13 Feb 2026 (NZDT)</td>
            </tr>
            <tr>
                <td>RFT-30555</td>
                <td><a href="/ExternalTenderDetails.htm?id=30555">Hospital sterile services redevelopment</a></td>
                <td>Health New Zealand</td>
                <td>4:30 PM 20 May 2026 (NZST)</td>
            </tr>
        </tbody></table>
    "#;

    #[tokio::test(start_paused = true)]
    async fn test_run_scoped_dedup_across_keyword_searches() {
        let s = scraper_with_keywords();
        let mut page = MockPage::new()
            .route(HEALTH_URL, HEALTH_RESULTS)
            .route(HOSPITAL_URL, HOSPITAL_RESULTS);

        let results = s.scrape(&mut page).await.unwrap();

        // RFT-30211 shows up in both searches but is kept once.
        assert_eq!(results.len(), 3);
        let refs: Vec<&str> = results.iter().map(|t| t.tender_reference.as_str()).collect();
        assert!(refs.contains(&"RFT-30211"));
        assert!(refs.contains(&"RFT-30300"));
        assert!(refs.contains(&"RFT-30555"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nz_locale_close_dates_normalized() {
        let s = scraper_with_keywords();
        let mut page = MockPage::new()
            .route(HEALTH_URL, HEALTH_RESULTS)
            .route(HOSPITAL_URL, HOSPITAL_RESULTS);

        let results = s.scrape(&mut page).await.unwrap();

        let workforce = results.iter().find(|t| t.tender_reference == "RFT-30211").unwrap();
        assert_eq!(workforce.close_date.as_deref(), Some("2026-02-13"));
        assert_eq!(workforce.issuing_body, "Te Whatu Ora");
        assert_eq!(workforce.region, "New Zealand");

        let sterile = results.iter().find(|t| t.tender_reference == "RFT-30555").unwrap();
        assert_eq!(sterile.close_date.as_deref(), Some("2026-05-20"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failed_search_does_not_sink_the_rest() {
        let s = scraper_with_keywords();
        let mut page = MockPage::new()
            .block(HEALTH_URL)
            .route(HOSPITAL_URL, HOSPITAL_RESULTS);

        let results = s.scrape(&mut page).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_searches_failing_is_a_portal_failure() {
        let s = scraper_with_keywords();
        let mut page = MockPage::new().block(HEALTH_URL).block(HOSPITAL_URL);

        assert!(s.scrape(&mut page).await.is_err());
    }
}
