//! CLI commands for hkjc-scraper.
//!
//! Supports API server mode and one-shot scraping to a JSON file.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::scraper::Browser;
use crate::session::{self, ScrapeSession};
use crate::status;
use crate::types::{RaceQuery, Racecourse};

#[derive(Parser)]
#[command(name = "hkjc-scraper")]
#[command(version, about = "HKJC race card scraper: API server and CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Scrape one race card to a JSON file
    Scrape {
        /// Race date (YYYY-MM-DD)
        #[arg(value_name = "DATE")]
        date: NaiveDate,

        /// Racecourse (st = Sha Tin, hv = Happy Valley)
        #[arg(short, long, value_enum)]
        course: Racecourse,

        /// Race number
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=12))]
        raceno: u8,

        /// Output file (defaults to data/results/)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Override total attempts per network request
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

/// Run a one-shot scrape from the command line.
pub async fn run_scrape(
    date: NaiveDate,
    course: Racecourse,
    raceno: u8,
    out: Option<PathBuf>,
    max_retries: Option<u32>,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;
    if let Some(retries) = max_retries {
        config.scraper.max_retries = retries;
    }

    let query = RaceQuery::new(date, course, raceno);
    let output = out.unwrap_or_else(|| session::default_output_path(&query));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling, progress is checkpointed");
                cancel.cancel();
            }
        });
    }

    let (handle, mut rx) = status::channel();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            if status.total > 0 {
                eprintln!("[{}/{}] {}", status.completed, status.total, status.message);
            } else {
                eprintln!("{}", status.message);
            }
        }
    });

    eprintln!("Scraping {query}");
    let browser = Browser::launch(&config.scraper).await?;
    let session = ScrapeSession::new(&config.scraper, handle, cancel);
    let outcome = session.run(&browser, &query, Some(&output)).await;
    browser.close().await?;

    let result = outcome?;
    eprintln!(
        "Wrote {} horses to {}",
        result.scrape_info.total_horses,
        output.display()
    );
    Ok(())
}
