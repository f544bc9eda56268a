use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Tender record ─────────────────────────────────────────────────────────────

/// Normalized tender notice — the one durable shape every portal produces.
///
/// `tender_reference` is the sole dedup key across runs; once a reference
/// exists in the store the record is immutable (closed tenders simply stop
/// appearing in later scrapes, there is no delete path).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenderResult {
    pub tender_reference: String,
    pub issuing_body: String,
    pub title: String,
    pub description: Option<String>,
    pub region: String,
    /// Canonical `YYYY-MM-DD`, or None when the portal gave nothing parseable.
    pub close_date: Option<String>,
    /// No portal extracts this reliably yet; kept for forward compatibility.
    pub estimated_value: Option<String>,
    pub source_url: String,
    pub portal: String,
}

// ── Raw extraction row ────────────────────────────────────────────────────────

/// What a selector strategy pulls straight out of the DOM, before any
/// normalization. Finalized into a `TenderResult` by `scrapers::finalize`.
#[derive(Debug, Clone, Default)]
pub struct RawListing {
    pub reference: Option<String>,
    pub title: String,
    pub agency: Option<String>,
    pub description: Option<String>,
    pub close_date_text: Option<String>,
    pub href: Option<String>,
}

// ── Per-run reporting ─────────────────────────────────────────────────────────

/// Outcome of one portal's scrape within a run. Feeds the audit log and the
/// post-run report sink; never persisted as a tender row.
#[derive(Debug, Clone)]
pub struct ScraperRunResult {
    pub portal: String,
    pub success: bool,
    pub found: usize,
    pub inserted: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Aggregate of a whole orchestrator run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<ScraperRunResult>,
}

impl RunSummary {
    pub fn total_found(&self) -> usize {
        self.results.iter().map(|r| r.found).sum()
    }

    pub fn total_inserted(&self) -> usize {
        self.results.iter().map(|r| r.inserted).sum()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

// ── Scraper status log row ────────────────────────────────────────────────────

/// Upserted per-portal status row, keyed by portal name. One row per portal,
/// holding only the last run's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ScraperLogEntry {
    pub portal: String,
    pub success: bool,
    pub tenders_found: i64,
    pub new_tenders: i64,
    pub error_message: Option<String>,
    pub last_run_at: NaiveDateTime,
}
