//! Run orchestration: drive every enabled portal scraper to completion
//! independently and report the aggregate.
//!
//! Each portal runs as its own task with its own page/session and an outer
//! timeout from its config. A thrown error, timeout or panic in one portal
//! never aborts another — scraped-HTML parsing is fragile enough that
//! isolation is the top design priority here. Total failure is a reportable
//! condition, not a process crash.

use crate::browser::{HttpPage, Page};
use crate::config::{portal_configs, AppConfig};
use crate::models::{RunSummary, ScraperLogEntry, ScraperRunResult};
use crate::scrapers::{build_scraper, PortalScraper};
use crate::storage::{store_tenders, TenderStore};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Produces a fresh page/session per portal run.
pub type PageFactory = Arc<dyn Fn() -> Result<Box<dyn Page>> + Send + Sync>;

/// Post-run hook for the aggregate report. Notification glue (webhooks,
/// dashboards) attaches here instead of inside the scrape logic.
pub trait ReportSink: Send + Sync {
    fn report(&self, summary: &RunSummary);
}

/// Default sink: structured log lines, one per portal plus a totals line.
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn report(&self, summary: &RunSummary) {
        for r in &summary.results {
            match &r.error {
                None => info!(
                    "{}: ok — {} found, {} new ({} ms)",
                    r.portal, r.found, r.inserted, r.duration_ms
                ),
                Some(e) => warn!(
                    "{}: FAILED after {} ms — {}",
                    r.portal, r.duration_ms, e
                ),
            }
        }
        info!(
            "run complete: {} portals, {} found, {} inserted, {} failed",
            summary.results.len(),
            summary.total_found(),
            summary.total_inserted(),
            summary.failures()
        );
    }
}

pub struct Orchestrator {
    config: AppConfig,
    store: Arc<dyn TenderStore>,
}

impl Orchestrator {
    pub fn new(config: AppConfig, store: Arc<dyn TenderStore>) -> Self {
        Self { config, store }
    }

    /// Run the enabled portals, optionally restricted to the comma-separated
    /// keys in `portal_filter` (the PORTALS env var / CLI flag).
    pub async fn run(&self, portal_filter: Option<&str>) -> Result<RunSummary> {
        let selected: Vec<&str> = portal_filter
            .map(|f| {
                f.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut jobs: Vec<(Box<dyn PortalScraper>, u64)> = Vec::new();
        for cfg in portal_configs() {
            if !cfg.enabled {
                continue;
            }
            if !selected.is_empty() && !selected.contains(&cfg.key) {
                continue;
            }
            match build_scraper(&cfg, &self.config) {
                Some(scraper) => jobs.push((scraper, cfg.timeout_secs)),
                None => warn!("no scraper registered for portal '{}'", cfg.key),
            }
        }

        if jobs.is_empty() {
            return Err(anyhow!("no portals matched the requested selection"));
        }

        let http = self.config.http.clone();
        let page_factory: PageFactory = Arc::new(move || {
            Ok(Box::new(HttpPage::new(&http).context("failed to build page")?) as Box<dyn Page>)
        });

        let summary = run_portals(jobs, page_factory, Arc::clone(&self.store)).await;
        LogReportSink.report(&summary);
        Ok(summary)
    }
}

/// Execute a set of portal jobs concurrently against the given store.
/// Always returns a summary covering every job, failed or not.
pub async fn run_portals(
    jobs: Vec<(Box<dyn PortalScraper>, u64)>,
    page_factory: PageFactory,
    store: Arc<dyn TenderStore>,
) -> RunSummary {
    let mut handles = Vec::new();

    for (scraper, timeout_secs) in jobs {
        let factory = Arc::clone(&page_factory);
        let store = Arc::clone(&store);

        handles.push(tokio::spawn(async move {
            let portal = scraper.key().to_string();
            info!("starting {} ({})", portal, scraper.display_name());

            let started = Instant::now();
            let outcome = run_one(scraper.as_ref(), timeout_secs, factory, store.as_ref()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok((found, inserted)) => ScraperRunResult {
                    portal: portal.clone(),
                    success: true,
                    found,
                    inserted,
                    duration_ms,
                    error: None,
                },
                Err(e) => ScraperRunResult {
                    portal: portal.clone(),
                    success: false,
                    found: 0,
                    inserted: 0,
                    duration_ms,
                    error: Some(format!("{e:#}")),
                },
            };

            // Audit row per portal; a log-write failure must not fail the run.
            let entry = ScraperLogEntry {
                portal: result.portal.clone(),
                success: result.success,
                tenders_found: result.found as i64,
                new_tenders: result.inserted as i64,
                error_message: result.error.clone(),
                last_run_at: Utc::now().naive_utc(),
            };
            if let Err(e) = store.upsert_scraper_log(&entry).await {
                warn!("{}: scraper log upsert failed: {}", result.portal, e);
            }

            result
        }));
    }

    let mut summary = RunSummary::default();
    for handle in handles {
        match handle.await {
            Ok(result) => summary.results.push(result),
            Err(e) => {
                // A panicking task still gets a row in the report.
                error!("portal task panicked: {}", e);
                summary.results.push(ScraperRunResult {
                    portal: "unknown".into(),
                    success: false,
                    found: 0,
                    inserted: 0,
                    duration_ms: 0,
                    error: Some(format!("task panicked: {e}")),
                });
            }
        }
    }
    summary
}

/// One portal: fresh page, bounded scrape, persist. The page is dropped on
/// every exit path, releasing its session.
async fn run_one(
    scraper: &dyn PortalScraper,
    timeout_secs: u64,
    page_factory: PageFactory,
    store: &dyn TenderStore,
) -> Result<(usize, usize)> {
    let mut page = page_factory()?;

    let results = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        scraper.scrape(page.as_mut()),
    )
    .await
    .map_err(|_| anyhow!("scrape exceeded the {}s portal timeout", timeout_secs))??;

    let inserted = store_tenders(store, &results)
        .await
        .context("persisting scrape batch failed")?;

    Ok((results.len(), inserted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockPage;
    use crate::models::TenderResult;
    use crate::storage::testing::MemoryStore;
    use async_trait::async_trait;

    fn tender(portal: &str, reference: &str) -> TenderResult {
        TenderResult {
            tender_reference: reference.into(),
            issuing_body: "Agency".into(),
            title: "Hospital services procurement".into(),
            description: None,
            region: "Australia".into(),
            close_date: None,
            estimated_value: None,
            source_url: "https://example.gov.au/t/1".into(),
            portal: portal.into(),
        }
    }

    enum Script {
        Yield(Vec<TenderResult>),
        Fail(&'static str),
        Hang,
    }

    struct FakeScraper {
        key: &'static str,
        script: Script,
    }

    #[async_trait]
    impl PortalScraper for FakeScraper {
        fn key(&self) -> &'static str {
            self.key
        }

        fn display_name(&self) -> &'static str {
            self.key
        }

        async fn scrape(&self, _page: &mut dyn Page) -> Result<Vec<TenderResult>> {
            match &self.script {
                Script::Yield(results) => Ok(results.clone()),
                Script::Fail(msg) => Err(anyhow!(*msg)),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn mock_factory() -> PageFactory {
        Arc::new(|| Ok(Box::new(MockPage::new()) as Box<dyn Page>))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_one_portal_does_not_abort_the_others() {
        let store = Arc::new(MemoryStore::new());
        let jobs: Vec<(Box<dyn PortalScraper>, u64)> = vec![
            (
                Box::new(FakeScraper {
                    key: "alpha",
                    script: Script::Yield(vec![tender("alpha", "A-1"), tender("alpha", "A-2")]),
                }),
                60,
            ),
            (
                Box::new(FakeScraper {
                    key: "beta",
                    script: Script::Fail("selector drift"),
                }),
                60,
            ),
            (
                Box::new(FakeScraper {
                    key: "gamma",
                    script: Script::Yield(vec![tender("gamma", "G-1")]),
                }),
                60,
            ),
        ];

        let summary = run_portals(jobs, mock_factory(), store.clone()).await;

        assert_eq!(summary.results.len(), 3);

        let alpha = summary.results.iter().find(|r| r.portal == "alpha").unwrap();
        assert!(alpha.success);
        assert_eq!(alpha.found, 2);
        assert_eq!(alpha.inserted, 2);

        let beta = summary.results.iter().find(|r| r.portal == "beta").unwrap();
        assert!(!beta.success);
        assert!(beta.error.as_deref().unwrap().contains("selector drift"));

        let gamma = summary.results.iter().find(|r| r.portal == "gamma").unwrap();
        assert!(gamma.success);
        assert_eq!(gamma.inserted, 1);

        // The failed portal contributed nothing; the others persisted.
        assert_eq!(store.tenders.lock().unwrap().len(), 3);
        // Every portal got an audit row, including the failure.
        assert_eq!(store.logs.lock().unwrap().len(), 3);
        let beta_log = {
            let logs = store.logs.lock().unwrap();
            logs.iter().find(|l| l.portal == "beta").unwrap().clone()
        };
        assert!(!beta_log.success);
        assert!(beta_log.error_message.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_portal_hits_outer_timeout() {
        let store = Arc::new(MemoryStore::new());
        let jobs: Vec<(Box<dyn PortalScraper>, u64)> = vec![(
            Box::new(FakeScraper {
                key: "stuck",
                script: Script::Hang,
            }),
            30,
        )];

        let summary = run_portals(jobs, mock_factory(), store).await;

        let r = &summary.results[0];
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("portal timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_is_fatal_to_that_portal_only() {
        let store = Arc::new(MemoryStore {
            fail_inserts: true,
            ..MemoryStore::default()
        });
        let jobs: Vec<(Box<dyn PortalScraper>, u64)> = vec![
            (
                Box::new(FakeScraper {
                    key: "alpha",
                    script: Script::Yield(vec![tender("alpha", "A-1")]),
                }),
                60,
            ),
            (
                Box::new(FakeScraper {
                    key: "gamma",
                    script: Script::Yield(Vec::new()),
                }),
                60,
            ),
        ];

        let summary = run_portals(jobs, mock_factory(), store).await;

        let alpha = summary.results.iter().find(|r| r.portal == "alpha").unwrap();
        assert!(!alpha.success);
        assert!(alpha.error.as_deref().unwrap().contains("persisting"));

        // Empty batch never touches insert, so gamma still succeeds —
        // "found 0 genuinely" stays distinguishable from "errored".
        let gamma = summary.results.iter().find(|r| r.portal == "gamma").unwrap();
        assert!(gamma.success);
        assert_eq!(gamma.found, 0);
        assert!(gamma.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_still_yields_a_full_summary() {
        let store = Arc::new(MemoryStore::new());
        let jobs: Vec<(Box<dyn PortalScraper>, u64)> = vec![
            (
                Box::new(FakeScraper {
                    key: "alpha",
                    script: Script::Fail("down"),
                }),
                60,
            ),
            (
                Box::new(FakeScraper {
                    key: "beta",
                    script: Script::Fail("also down"),
                }),
                60,
            ),
        ];

        let summary = run_portals(jobs, mock_factory(), store).await;
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.failures(), 2);
    }
}
