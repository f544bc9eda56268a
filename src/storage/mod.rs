//! Persistence: reference-keyed dedup over a hosted row store.
//!
//! The store is a Supabase-style REST facade over Postgres: select with an
//! in-set filter, batch insert, upsert-by-key. Everything crosses this
//! boundary as a result-or-error value; the caller decides what is fatal.
//! Inserts are at-least-once — a failure mid-batch is not rolled back, and
//! the reference-based dedup on the next run absorbs the duplication risk.

use crate::config::StoreConfig;
use crate::models::{ScraperLogEntry, TenderResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const TENDERS_TABLE: &str = "tenders";
const LOG_TABLE: &str = "scraper_logs";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store credentials missing: set TENDER_STORE_URL and TENDER_STORE_KEY")]
    MissingCredentials,

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected request (HTTP {status}): {message}")]
    Api { status: u16, message: String },
}

/// Row store operations the scraper core needs. Kept minimal so tests can run
/// against an in-memory double.
#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Which of `refs` already exist — filtered select, never a table scan.
    async fn existing_references(&self, refs: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Insert a batch of new tender rows.
    async fn insert_tenders(&self, rows: &[TenderResult]) -> Result<(), StoreError>;

    /// Upsert the per-portal status row, keyed by portal name.
    async fn upsert_scraper_log(&self, entry: &ScraperLogEntry) -> Result<(), StoreError>;
}

// ── Dedup + insert ────────────────────────────────────────────────────────────

/// Store a scrape batch: look up which references are already known, insert
/// only the unseen ones, return how many went in. Zero new records is a
/// normal, successful outcome.
pub async fn store_tenders(
    store: &dyn TenderStore,
    batch: &[TenderResult],
) -> Result<usize, StoreError> {
    if batch.is_empty() {
        return Ok(0);
    }

    let refs: Vec<String> = batch.iter().map(|t| t.tender_reference.clone()).collect();
    let existing = store.existing_references(&refs).await?;

    let mut seen_in_batch: HashSet<&str> = HashSet::new();
    let fresh: Vec<TenderResult> = batch
        .iter()
        .filter(|t| !existing.contains(&t.tender_reference))
        .filter(|t| seen_in_batch.insert(t.tender_reference.as_str()))
        .cloned()
        .collect();

    if fresh.is_empty() {
        debug!("batch of {} contained nothing new", batch.len());
        return Ok(0);
    }

    store.insert_tenders(&fresh).await?;
    info!("inserted {} new tenders ({} already known)", fresh.len(), batch.len() - fresh.len());
    Ok(fresh.len())
}

// ── REST implementation ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ReferenceRow {
    tender_reference: String,
}

impl RestStore {
    pub fn new(cfg: &StoreConfig) -> Result<Self, StoreError> {
        if cfg.url.trim().is_empty() || cfg.key.trim().is_empty() {
            return Err(StoreError::MissingCredentials);
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&cfg.key).map_err(|_| StoreError::MissingCredentials)?;
        headers.insert("apikey", key);
        let bearer = HeaderValue::from_str(&format!("Bearer {}", cfg.key))
            .map_err(|_| StoreError::MissingCredentials)?;
        headers.insert("Authorization", bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TenderStore for RestStore {
    async fn existing_references(&self, refs: &[String]) -> Result<HashSet<String>, StoreError> {
        if refs.is_empty() {
            return Ok(HashSet::new());
        }

        // PostgREST in-set filter: tender_reference=in.("a","b",...)
        let quoted: Vec<String> = refs
            .iter()
            .map(|r| format!("\"{}\"", r.replace('"', "")))
            .collect();
        let filter = format!("in.({})", quoted.join(","));

        let resp = self
            .client
            .get(self.table_url(TENDERS_TABLE))
            .query(&[
                ("select", "tender_reference"),
                ("tender_reference", filter.as_str()),
            ])
            .send()
            .await?;

        let rows: Vec<ReferenceRow> = Self::check(resp).await?.json().await?;
        Ok(rows.into_iter().map(|r| r.tender_reference).collect())
    }

    async fn insert_tenders(&self, rows: &[TenderResult]) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.table_url(TENDERS_TABLE))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn upsert_scraper_log(&self, entry: &ScraperLogEntry) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.table_url(LOG_TABLE))
            .query(&[("on_conflict", "portal")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[entry])
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

// ── In-memory double ──────────────────────────────────────────────────────────
