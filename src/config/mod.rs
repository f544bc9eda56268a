use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub debug: DebugConfig,
}

/// HTTP politeness / retry knobs shared by every portal page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Human-delay bounds between navigation actions, milliseconds.
    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,
}

/// Hosted row store (Supabase-style REST over Postgres).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Base URL, e.g. https://xyz.supabase.co — from TENDER_STORE_URL.
    #[serde(default)]
    pub url: String,

    /// Service key with write permission — from TENDER_STORE_KEY.
    #[serde(default)]
    pub key: String,
}

/// Debug snapshot output.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebugConfig {
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

// ── Portal table ──────────────────────────────────────────────────────────────

/// Static per-portal configuration. Built once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub key: &'static str,
    pub display_name: &'static str,
    pub enabled: bool,
    pub base_url: &'static str,
    pub region: &'static str,
    /// Fallback issuing body when the listing carries no agency text.
    pub default_agency: &'static str,
    pub search_keywords: &'static [&'static str],
    pub max_pages: u32,
    /// Outer bound for the whole portal scrape.
    pub timeout_secs: u64,
}

/// The compiled-in portal table. Base URLs are configuration of the binary,
/// not of the environment — portal markup churns often enough that a
/// redeployment is needed anyway when one changes.
pub fn portal_configs() -> Vec<PortalConfig> {
    vec![
        PortalConfig {
            key: "austender",
            display_name: "AusTender (Federal)",
            enabled: true,
            base_url: "https://www.tenders.gov.au",
            region: "Australia",
            default_agency: "Australian Government",
            search_keywords: &["health", "hospital", "medical"],
            max_pages: 5,
            timeout_secs: 300,
        },
        PortalConfig {
            key: "victoria",
            display_name: "Buying for Victoria",
            enabled: true,
            base_url: "https://www.tenders.vic.gov.au",
            region: "Victoria",
            default_agency: "Victorian Government",
            search_keywords: &["health", "hospital", "medical"],
            max_pages: 3,
            timeout_secs: 300,
        },
        PortalConfig {
            key: "nsw",
            display_name: "NSW eTendering",
            enabled: true,
            base_url: "https://www.tenders.nsw.gov.au",
            region: "New South Wales",
            default_agency: "NSW Government",
            search_keywords: &["health", "hospital", "medical"],
            max_pages: 3,
            timeout_secs: 300,
        },
        PortalConfig {
            key: "qld",
            display_name: "QTenders",
            enabled: true,
            base_url: "https://qtenders.epw.qld.gov.au",
            region: "Queensland",
            default_agency: "Queensland Government",
            search_keywords: &["health", "hospital", "medical"],
            max_pages: 3,
            timeout_secs: 360,
        },
        PortalConfig {
            key: "nz-gets",
            display_name: "NZ GETS",
            enabled: true,
            base_url: "https://www.gets.govt.nz",
            region: "New Zealand",
            default_agency: "New Zealand Government",
            search_keywords: &["health", "hospital", "medical", "clinical software"],
            max_pages: 2,
            timeout_secs: 300,
        },
    ]
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_user_agent() -> String {
    // Realistic desktop UA; the Victorian portal rejects obvious bots.
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/126.0.0.0 Safari/537.36"
        .to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> usize {
    2
}
fn default_retry_backoff_ms() -> u64 {
    2000
}
fn default_delay_min_ms() -> u64 {
    1000
}
fn default_delay_max_ms() -> u64 {
    3000
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("debug")
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides.
    ///
    /// Store credentials come from TENDER_STORE_URL / TENDER_STORE_KEY (or the
    /// TENDER__STORE__* forms the config crate maps); whether they are actually
    /// required depends on the command, so absence is not an error here.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("TENDER").separator("__"))
            .build()?;

        let mut app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());

        // Flat env var forms take precedence — these are what deployments set.
        if let Ok(url) = std::env::var("TENDER_STORE_URL") {
            app_cfg.store.url = url;
        }
        if let Ok(key) = std::env::var("TENDER_STORE_KEY") {
            app_cfg.store.key = key;
        }

        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                user_agent: default_user_agent(),
                timeout_secs: default_timeout_secs(),
                max_retries: default_max_retries(),
                retry_backoff_ms: default_retry_backoff_ms(),
                delay_min_ms: default_delay_min_ms(),
                delay_max_ms: default_delay_max_ms(),
            },
            store: StoreConfig::default(),
            debug: DebugConfig {
                snapshot_dir: default_snapshot_dir(),
            },
        }
    }
}
