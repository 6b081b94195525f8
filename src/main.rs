//! HKJC Race Card Scraper
//!
//! REST API and CLI for resilient, resumable scraping of race cards
//! from racing.hkjc.com.

mod checkpoint;
mod cli;
mod config;
mod error;
mod retry;
mod routes;
mod scraper;
mod session;
mod status;
mod types;

use axum::{routing::get, routing::post, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hkjc_scraper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => run_server(Some(host), Some(port)).await,
        Commands::Scrape {
            date,
            course,
            raceno,
            out,
            max_retries,
        } => cli::run_scrape(date, course, raceno, out, max_retries).await,
    }
}

/// Run the API server.
async fn run_server(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    // Load configuration
    let mut config = AppConfig::load()?;

    // Override with CLI args
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(p) = port {
        config.server.port = p;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("Checkpoint dir: {}", config.scraper.checkpoint_dir);

    // Create application state
    let state = Arc::new(AppState::new(config.clone()));

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/api/scrape", post(routes::start_scrape))
        .route("/api/status", get(routes::scrape_status))
        .route("/api/cancel", post(routes::cancel_scrape))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
