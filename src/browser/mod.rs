//! Minimal page abstraction over whatever fetches and renders portal HTML.
//!
//! Scrapers only ever see the `Page` trait: navigate, reload, read the current
//! DOM text, persist a diagnostic snapshot. The production implementation is a
//! plain HTTP client with a cookie jar and browser-like headers; readiness
//! waiting for client-rendered portals is modeled as bounded reload-and-check
//! (see `scrapers::wait_for_content`), and "clicking" a pagination control is
//! navigating to its resolved href.

use crate::config::HttpConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, UPGRADE_INSECURE_REQUESTS};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// 403 from a bot-protected portal. Distinct from `Status` so callers can
    /// take an alternate navigation path instead of treating it as broken.
    #[error("access blocked (HTTP 403) for {url}")]
    Blocked { url: String },

    #[error("snapshot write failed: {0}")]
    Snapshot(#[from] std::io::Error),
}

impl PageError {
    fn is_transient(&self) -> bool {
        match self {
            PageError::Navigation { .. } => true,
            PageError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A live page/session belonging to exactly one portal scrape.
#[async_trait]
pub trait Page: Send {
    /// Navigate to an absolute URL and load its content.
    async fn goto(&mut self, url: &str) -> Result<(), PageError>;

    /// Re-fetch the current URL (readiness polling for client-rendered sites).
    async fn reload(&mut self) -> Result<(), PageError>;

    fn url(&self) -> &str;

    /// The page's current rendered markup. Empty before the first `goto`.
    fn content(&self) -> &str;

    /// Persist the current page state to `path` for offline diagnosis.
    async fn snapshot(&self, path: &Path) -> Result<(), PageError>;
}

// ── HTTP-backed implementation ────────────────────────────────────────────────

pub struct HttpPage {
    client: reqwest::Client,
    config: HttpConfig,
    current_url: String,
    body: String,
}

impl HttpPage {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-AU,en;q=0.9"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Session cookies matter on the SPA portals
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            current_url: String::new(),
            body: String::new(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, PageError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PageError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.as_u16() == 403 {
            return Err(PageError::Blocked {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(PageError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(|e| PageError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &str) -> Result<(), PageError> {
        debug!("GET {}", url);

        let strategy =
            FixedInterval::from_millis(self.config.retry_backoff_ms).take(self.config.max_retries);

        let body = RetryIf::start(
            strategy,
            || self.fetch(url),
            |e: &PageError| {
                let transient = e.is_transient();
                if transient {
                    warn!("transient failure on {}: {} — retrying", url, e);
                }
                transient
            },
        )
        .await?;

        self.current_url = url.to_string();
        self.body = body;
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), PageError> {
        let url = self.current_url.clone();
        self.goto(&url).await
    }

    fn url(&self) -> &str {
        &self.current_url
    }

    fn content(&self) -> &str {
        &self.body
    }

    async fn snapshot(&self, path: &Path) -> Result<(), PageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &self.body).await?;
        Ok(())
    }
}

// ── Test double ───────────────────────────────────────────────────────────────
