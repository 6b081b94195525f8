//! Session status published over a watch channel.
//!
//! The running session is the only writer; any number of readers (the
//! HTTP status route, the CLI progress printer) take cheap snapshots of
//! the latest value. There is no queue to drain and no history: a slow
//! poller simply sees the newest state.

use serde::Serialize;
use tokio::sync::watch;

use crate::types::ScrapeResult;

/// Where the session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    FetchingListing,
    FetchingDetails,
    Persisting,
    Completed,
    Failed,
    Cancelled,
}

/// Snapshot of session progress, serialized as-is by the status route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeStatus {
    pub is_running: bool,
    pub phase: Phase,
    /// Horses finished so far. Zero until the listing is known.
    pub completed: usize,
    /// Horses on the race card. Zero until the listing is known.
    pub total: usize,
    /// `completed` over `total` as 0-100, so pollers never do the
    /// division themselves.
    pub progress_percent: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScrapeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeStatus {
    pub fn idle() -> Self {
        Self {
            is_running: false,
            phase: Phase::Idle,
            completed: 0,
            total: 0,
            progress_percent: 0,
            message: "idle".to_string(),
            result: None,
            error: None,
        }
    }
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (completed * 100 / total).min(100) as u8
}

/// Writer half. Owned by the running session task.
#[derive(Clone)]
pub struct StatusHandle {
    tx: watch::Sender<ScrapeStatus>,
}

/// Create a status channel seeded with the idle state.
pub fn channel() -> (StatusHandle, watch::Receiver<ScrapeStatus>) {
    let (tx, rx) = watch::channel(ScrapeStatus::idle());
    (StatusHandle { tx }, rx)
}

impl StatusHandle {
    /// Publish an in-progress update.
    pub fn report(&self, phase: Phase, completed: usize, total: usize, message: impl Into<String>) {
        let _ = self.tx.send(ScrapeStatus {
            is_running: true,
            phase,
            completed,
            total,
            progress_percent: percent(completed, total),
            message: message.into(),
            result: None,
            error: None,
        });
    }

    /// Publish the terminal success state with the final document.
    pub fn finish(&self, result: ScrapeResult) {
        let total = result.scrape_info.total_horses;
        let _ = self.tx.send(ScrapeStatus {
            is_running: false,
            phase: Phase::Completed,
            completed: total,
            total,
            progress_percent: 100,
            message: format!("scraped {total} horses"),
            result: Some(result),
            error: None,
        });
    }

    /// Publish the terminal failure state.
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        let _ = self.tx.send(ScrapeStatus {
            is_running: false,
            phase: Phase::Failed,
            completed: 0,
            total: 0,
            progress_percent: 0,
            message: error.clone(),
            result: None,
            error: Some(error),
        });
    }

    /// Publish the terminal cancelled state.
    pub fn cancelled(&self) {
        let _ = self.tx.send(ScrapeStatus {
            is_running: false,
            phase: Phase::Cancelled,
            completed: 0,
            total: 0,
            progress_percent: 0,
            message: "cancelled".to_string(),
            result: None,
            error: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RaceQuery, Racecourse};
    use chrono::NaiveDate;

    #[test]
    fn test_starts_idle() {
        let (_handle, rx) = channel();
        let status = rx.borrow();
        assert!(!status.is_running);
        assert_eq!(status.phase, Phase::Idle);
    }

    #[test]
    fn test_reader_sees_latest_update_only() {
        let (handle, rx) = channel();
        handle.report(Phase::FetchingListing, 0, 0, "fetching race card");
        handle.report(Phase::FetchingDetails, 3, 11, "horse 3 of 11");
        let status = rx.borrow();
        assert!(status.is_running);
        assert_eq!(status.phase, Phase::FetchingDetails);
        assert_eq!(status.completed, 3);
        assert_eq!(status.total, 11);
        assert_eq!(status.progress_percent, 27);
    }

    #[test]
    fn test_progress_percent_bounds() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(0, 11), 0);
        assert_eq!(percent(11, 11), 100);
        assert_eq!(percent(12, 11), 100);
    }

    #[test]
    fn test_finish_carries_result() {
        let (handle, rx) = channel();
        let query = RaceQuery::new(
            NaiveDate::from_ymd_opt(2025, 9, 17).unwrap(),
            Racecourse::ST,
            1,
        );
        handle.finish(ScrapeResult::new(&query, vec![]));
        let status = rx.borrow();
        assert!(!status.is_running);
        assert_eq!(status.phase, Phase::Completed);
        assert_eq!(status.progress_percent, 100);
        assert!(status.result.is_some());
        assert!(status.error.is_none());
    }

    #[test]
    fn test_fail_carries_error() {
        let (handle, rx) = channel();
        handle.fail("race card contained no usable entries");
        let status = rx.borrow();
        assert!(!status.is_running);
        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(
            status.error.as_deref(),
            Some("race card contained no usable entries")
        );
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = ScrapeStatus::idle();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isRunning"], false);
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["progressPercent"], 0);
        assert!(json.get("result").is_none());
    }
}
