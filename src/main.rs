mod browser;
mod config;
mod dates;
mod filter;
mod models;
mod pipeline;
mod scrapers;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{portal_configs, AppConfig};
use crate::pipeline::Orchestrator;
use crate::storage::RestStore;

#[derive(Parser)]
#[command(name = "tender-scraper", about = "APAC government tender scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the configured portals and persist new tenders
    Scrape {
        /// Comma-separated portal keys to run (default: all enabled)
        #[arg(long, env = "PORTALS")]
        portals: Option<String>,
    },

    /// List the compiled-in portal configurations
    Portals,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "tender_scraper=info,warn",
        1 => "tender_scraper=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape { portals } => {
            let _t = utils::Timer::start("Tender scrape");

            // Missing credentials are the one fatal configuration error.
            let store = Arc::new(RestStore::new(&config.store)?);

            let summary = Orchestrator::new(config, store)
                .run(portals.as_deref())
                .await?;

            // Per-portal failures are reported, not fatal: the run completed.
            info!(
                "Done: {} found, {} inserted, {} portal failures",
                summary.total_found(),
                summary.total_inserted(),
                summary.failures()
            );
        }

        Command::Portals => {
            println!("─────────────────────────────────────────────");
            println!("  Configured portals");
            println!("─────────────────────────────────────────────");
            for p in portal_configs() {
                println!(
                    "  {:10} {:24} {}  (max {} pages, {}s timeout)",
                    p.key,
                    p.display_name,
                    if p.enabled { "enabled " } else { "disabled" },
                    p.max_pages,
                    p.timeout_secs
                );
            }
            println!("─────────────────────────────────────────────");
        }
    }

    Ok(())
}
