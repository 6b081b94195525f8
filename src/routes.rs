//! API route handlers.
//!
//! One scrape session runs at a time. Starting a session swaps in a
//! fresh status channel; polling reads the latest snapshot from it.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::scraper::Browser;
use crate::session::{self, ScrapeSession};
use crate::status::{self, Phase, ScrapeStatus};
use crate::types::{RaceQuery, Racecourse};

/// Application state shared across handlers.
pub struct AppState {
    pub config: AppConfig,
    inner: Mutex<SessionSlot>,
}

struct SessionSlot {
    rx: watch::Receiver<ScrapeStatus>,
    cancel: Option<CancellationToken>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let (_handle, rx) = status::channel();
        Self {
            config,
            inner: Mutex::new(SessionSlot { rx, cancel: None }),
        }
    }
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub date: NaiveDate,
    pub course: Racecourse,
    pub race_number: u8,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Start a scrape session. Rejected while one is already running.
pub async fn start_scrape(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<ScrapeStatus>, ApiError> {
    if !(1..=12).contains(&req.race_number) {
        return Err(ApiError::bad_request("race number must be 1-12"));
    }

    let mut slot = state.inner.lock().await;
    if slot.rx.borrow().is_running {
        return Err(ApiError::bad_request(
            "a scrape session is already running",
        ));
    }

    let query = RaceQuery::new(req.date, req.course, req.race_number);
    let (handle, rx) = status::channel();
    // Mark running before releasing the slot so a racing second POST
    // is rejected.
    handle.report(Phase::FetchingListing, 0, 0, format!("starting {query}"));
    let cancel = CancellationToken::new();
    slot.rx = rx.clone();
    slot.cancel = Some(cancel.clone());
    drop(slot);

    info!(%query, "scrape requested");
    let config = state.config.scraper.clone();
    tokio::spawn(async move {
        let session = ScrapeSession::new(&config, handle.clone(), cancel);
        let browser = match Browser::launch(&config).await {
            Ok(browser) => browser,
            Err(e) => {
                handle.fail(format!("failed to launch browser: {e}"));
                return;
            }
        };
        let output = session::default_output_path(&query);
        // Terminal status is published by the session itself.
        let _ = session.run(&browser, &query, Some(&output)).await;
        let _ = browser.close().await;
    });

    let status = rx.borrow().clone();
    Ok(Json(status))
}

/// Latest session status snapshot.
pub async fn scrape_status(State(state): State<Arc<AppState>>) -> Json<ScrapeStatus> {
    let slot = state.inner.lock().await;
    let status = slot.rx.borrow().clone();
    Json(status)
}

/// Cancel the running session. The checkpoint is kept for resume.
pub async fn cancel_scrape(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScrapeStatus>, ApiError> {
    let slot = state.inner.lock().await;
    if !slot.rx.borrow().is_running {
        return Err(ApiError::bad_request("no scrape session is running"));
    }
    if let Some(cancel) = &slot.cancel {
        cancel.cancel();
        info!("scrape cancellation requested");
    }
    let status = slot.rx.borrow().clone();
    Ok(Json(status))
}
