//! Scrape session orchestration.
//!
//! A session walks one race card end to end: fetch the listing, fetch
//! every horse's detail page, assemble the final document in listing
//! order, persist it, clear the checkpoint. Progress is checkpointed
//! per horse so an interrupted session resumes without re-fetching
//! finished work.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::retry::{self, RetryConfig};
use crate::scraper::parsers::{HorseDetailParser, RaceCardParser, VeterinaryParser};
use crate::scraper::{race_card_url, Fetch, RateLimiter, VETERINARY_URL};
use crate::status::{Phase, StatusHandle};
use crate::types::{HorseRecord, HorseStub, InjuryRecord, RaceQuery, ScrapeResult};

/// One scrape session over a single race query.
pub struct ScrapeSession {
    retry: RetryConfig,
    limiter: RateLimiter,
    store: CheckpointStore,
    checkpoint_interval: usize,
    status: StatusHandle,
    cancel: CancellationToken,
}

/// Where the server persists results when no explicit path is given.
pub fn default_output_path(query: &RaceQuery) -> PathBuf {
    PathBuf::from(format!(
        "data/results/{}_{}_R{}.json",
        query.date.format("%Y%m%d"),
        query.course,
        query.race_number
    ))
}

impl ScrapeSession {
    pub fn new(config: &ScraperConfig, status: StatusHandle, cancel: CancellationToken) -> Self {
        Self {
            retry: RetryConfig::from_scraper_config(config),
            limiter: RateLimiter::new(
                config.requests_per_minute,
                Duration::from_millis(config.min_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
            store: CheckpointStore::new(config.checkpoint_dir.clone()),
            checkpoint_interval: config.checkpoint_interval.max(1),
            status,
            cancel,
        }
    }

    /// Run the session to completion and publish the terminal status.
    pub async fn run(
        &self,
        fetcher: &dyn Fetch,
        query: &RaceQuery,
        output: Option<&Path>,
    ) -> Result<ScrapeResult> {
        info!(%query, "scrape session starting");
        match self.execute(fetcher, query, output).await {
            Ok(result) => {
                info!(%query, horses = result.scrape_info.total_horses, "scrape session finished");
                self.status.finish(result.clone());
                Ok(result)
            }
            Err(ScrapeError::Cancelled) => {
                warn!(%query, "scrape session cancelled, checkpoint kept");
                self.status.cancelled();
                Err(ScrapeError::Cancelled)
            }
            Err(e) => {
                error!(%query, error = %e, "scrape session failed");
                self.status.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        fetcher: &dyn Fetch,
        query: &RaceQuery,
        output: Option<&Path>,
    ) -> Result<ScrapeResult> {
        let fingerprint = query.fingerprint();
        let _lock = self.store.acquire(&fingerprint)?;

        let mut checkpoint = self
            .store
            .load(&fingerprint)
            .unwrap_or_else(|| Checkpoint::new(&fingerprint));

        self.status
            .report(Phase::FetchingListing, 0, 0, format!("fetching race card {query}"));

        let url = race_card_url(query);
        let html = retry::execute(&self.retry, &self.limiter, "race card", || {
            fetcher.fetch(&url)
        })
        .await?;
        let stubs = RaceCardParser::parse(&html)?;
        let total = stubs.len();
        info!(%query, horses = total, "race card parsed");

        let mut completed = stubs
            .iter()
            .filter(|s| checkpoint.contains(&s.horse_id))
            .count();

        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        // Injury records live on one shared page, not the detail pages.
        // Skipped entirely when the checkpoint already covers the card.
        let injuries = if completed < total {
            self.fetch_veterinary_records(fetcher).await
        } else {
            HashMap::new()
        };

        let mut dirty = 0usize;
        for stub in &stubs {
            if self.cancel.is_cancelled() {
                if dirty > 0 {
                    self.store.save(&checkpoint)?;
                }
                return Err(ScrapeError::Cancelled);
            }

            if checkpoint.contains(&stub.horse_id) {
                debug!(horse_id = %stub.horse_id, "already in checkpoint, skipping");
                continue;
            }

            self.status.report(
                Phase::FetchingDetails,
                completed,
                total,
                format!("{} ({} of {total})", stub.name, completed + 1),
            );

            let record = self.scrape_detail(fetcher, stub, &injuries).await;
            checkpoint.record(&stub.horse_id, record);
            completed += 1;
            dirty += 1;
            if dirty >= self.checkpoint_interval {
                self.store.save(&checkpoint)?;
                dirty = 0;
            }
        }
        if dirty > 0 {
            self.store.save(&checkpoint)?;
        }

        // Output order is the race card's listing order, regardless of
        // which horses came from the checkpoint.
        let mut horses = Vec::with_capacity(total);
        for stub in &stubs {
            let record = checkpoint.horses.get(&stub.horse_id).cloned().ok_or_else(|| {
                ScrapeError::Validation(format!("no record for horse {}", stub.horse_id))
            })?;
            horses.push(record);
        }
        validate(&stubs, &horses)?;

        self.status.report(
            Phase::Persisting,
            completed,
            total,
            "persisting result".to_string(),
        );
        let result = ScrapeResult::new(query, horses);
        if let Some(path) = output {
            persist(&result, path)?;
        }
        self.store.clear(&fingerprint)?;
        Ok(result)
    }

    /// Fetch the shared veterinary page, keyed by horse name. Failure
    /// is non-fatal: the card completes with empty injury lists.
    async fn fetch_veterinary_records(
        &self,
        fetcher: &dyn Fetch,
    ) -> HashMap<String, Vec<InjuryRecord>> {
        match retry::execute(&self.retry, &self.limiter, "veterinary records", || {
            fetcher.fetch(VETERINARY_URL)
        })
        .await
        {
            Ok(html) => match VeterinaryParser::parse(&html) {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "veterinary records unparseable, continuing without");
                    HashMap::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "veterinary records unavailable, continuing without");
                HashMap::new()
            }
        }
    }

    /// Fetch and parse one detail page. Never fatal: a horse whose
    /// detail page cannot be processed becomes a flagged placeholder so
    /// the rest of the card still completes.
    async fn scrape_detail(
        &self,
        fetcher: &dyn Fetch,
        stub: &HorseStub,
        injuries: &HashMap<String, Vec<InjuryRecord>>,
    ) -> HorseRecord {
        let url = match &stub.detail_url {
            Some(url) => url,
            None => {
                warn!(horse_id = %stub.horse_id, "race card row has no detail link");
                return HorseRecord::placeholder(stub, "no detail link on race card");
            }
        };

        match retry::execute(&self.retry, &self.limiter, "horse detail", || {
            fetcher.fetch(url)
        })
        .await
        {
            Ok(html) => match HorseDetailParser::parse(&html) {
                Ok(mut detail) => {
                    if detail.injuries.is_empty() {
                        if let Some(records) = injuries.get(&stub.name) {
                            detail.injuries = records.clone();
                        }
                    }
                    HorseRecord::assemble(stub, detail)
                }
                Err(e) => self.detail_placeholder(stub, e),
            },
            Err(e) => self.detail_placeholder(stub, e),
        }
    }

    fn detail_placeholder(&self, stub: &HorseStub, cause: ScrapeError) -> HorseRecord {
        let error = ScrapeError::HorseDetail {
            horse_id: stub.horse_id.clone(),
            message: cause.to_string(),
        };
        warn!(error = %error, "continuing with empty-detail placeholder");
        HorseRecord::placeholder(stub, &error.to_string())
    }
}

/// Final gate before persistence. A document that fails here is a bug
/// upstream and must not reach disk.
fn validate(stubs: &[HorseStub], horses: &[HorseRecord]) -> Result<()> {
    if horses.len() != stubs.len() {
        return Err(ScrapeError::Validation(format!(
            "expected {} horses, assembled {}",
            stubs.len(),
            horses.len()
        )));
    }
    let mut seen = HashSet::new();
    for horse in horses {
        if horse.horse_id.is_empty() {
            return Err(ScrapeError::Validation(
                "record with empty horse id".to_string(),
            ));
        }
        if !seen.insert(horse.horse_id.as_str()) {
            return Err(ScrapeError::Validation(format!(
                "duplicate horse id {}",
                horse.horse_id
            )));
        }
    }
    Ok(())
}

fn persist(result: &ScrapeResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(result)?)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), "result persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    use crate::types::Racecourse;

    /// Replays scripted responses per URL, in order.
    struct ScriptedFetch {
        responses: Mutex<HashMap<String, VecDeque<Result<String>>>>,
        calls: AtomicU32,
    }

    impl ScriptedFetch {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: AtomicU32::new(0),
            }
        }

        fn script(&self, url: &str, response: Result<String>) {
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetch {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    Err(ScrapeError::PermanentFetch(format!("unscripted url {url}")))
                })
        }
    }

    fn query() -> RaceQuery {
        RaceQuery::new(
            NaiveDate::from_ymd_opt(2025, 9, 17).unwrap(),
            Racecourse::HV,
            4,
        )
    }

    fn test_config(checkpoint_dir: &Path) -> ScraperConfig {
        ScraperConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            requests_per_minute: 6_000,
            max_retries: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            checkpoint_interval: 1,
            checkpoint_dir: checkpoint_dir.to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    fn session(config: &ScraperConfig) -> (ScrapeSession, tokio::sync::watch::Receiver<crate::status::ScrapeStatus>) {
        let (handle, rx) = status::channel();
        let session = ScrapeSession::new(config, handle, CancellationToken::new());
        (session, rx)
    }

    fn listing_html(ids: &[&str]) -> String {
        let mut html = String::from(
            "<table><tr><td>馬號</td><td>馬名</td><td>騎師</td></tr>",
        );
        for (i, id) in ids.iter().enumerate() {
            html.push_str(&format!(
                "<tr><td>{}</td>\
                 <td><a href=\"/racing/information/Horse.aspx?HorseId=HK_2025_{id}\">馬{}</a></td>\
                 <td>騎師{}</td></tr>",
                i + 1,
                i + 1,
                i + 1,
            ));
        }
        html.push_str("</table>");
        html
    }

    fn detail_url(id: &str) -> String {
        format!("https://racing.hkjc.com/racing/information/Horse.aspx?HorseId=HK_2025_{id}")
    }

    fn detail_html() -> String {
        "<table>\
         <tr><th>日期</th><th>途程</th><th>檔位</th><th>騎師</th><th>名次</th></tr>\
         <tr><td>03/09/2025</td><td>1200</td><td>4</td><td>潘頓</td><td>1</td></tr>\
         </table>\
         <table><tr><td>出生地</td><td>紐西蘭</td></tr></table>"
            .to_string()
    }

    /// Veterinary database page with one record for 馬6.
    fn vet_html() -> String {
        "<table>\
         <tr><th>烙印編號</th><th>馬名</th><th>日期</th><th>詳情</th><th>通過日期</th></tr>\
         <tr><td>K106</td><td>馬6</td><td>02/05/2025</td><td>右前腿跛行</td><td>20/05/2025</td></tr>\
         </table>"
            .to_string()
    }

    fn empty_vet_html() -> String {
        "<table>\
         <tr><th>烙印編號</th><th>馬名</th><th>日期</th><th>詳情</th><th>通過日期</th></tr>\
         </table>"
            .to_string()
    }

    fn eleven_ids() -> Vec<String> {
        (1..=11).map(|i| format!("K{:03}", 100 + i)).collect()
    }

    #[tokio::test]
    async fn test_end_to_end_with_transient_detail_failure() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("checkpoints"));
        let (session, rx) = session(&config);
        let q = query();
        let ids = eleven_ids();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let fetch = ScriptedFetch::new();
        fetch.script(&race_card_url(&q), Ok(listing_html(&id_refs)));
        fetch.script(VETERINARY_URL, Ok(vet_html()));
        for id in &ids {
            if id == "K106" {
                // First detail attempt times out, second succeeds.
                fetch.script(
                    &detail_url(id),
                    Err(ScrapeError::TransientFetch("timeout".into())),
                );
            }
            fetch.script(&detail_url(id), Ok(detail_html()));
        }

        let out = dir.path().join("out/result.json");
        let result = session.run(&fetch, &q, Some(&out)).await.unwrap();

        assert_eq!(result.horses.len(), 11);
        assert_eq!(result.scrape_info.total_horses, 11);
        // Listing order preserved.
        let got: Vec<&str> = result.horses.iter().map(|h| h.horse_id.as_str()).collect();
        assert_eq!(got, id_refs);
        assert!(result.horses.iter().all(|h| h.detail_error.is_none()));
        assert_eq!(result.horses[0].profile, "出生地: 紐西蘭");
        // The horse whose first attempt timed out still has full detail.
        let retried = &result.horses[5];
        assert_eq!(retried.horse_id, "K106");
        assert!(!retried.past_runs.is_empty());
        // Injury record correlated from the veterinary page by name.
        assert_eq!(retried.injuries.len(), 1);
        assert_eq!(retried.injuries[0].description, "右前腿跛行");
        assert!(result.horses[0].injuries.is_empty());
        // 1 listing + 1 veterinary page + 11 details + 1 retried attempt.
        assert_eq!(fetch.calls(), 14);

        // Persisted document round-trips.
        let on_disk: ScrapeResult =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(on_disk.horses.len(), 11);

        // Checkpoint cleared after success.
        let store = CheckpointStore::new(config.checkpoint_dir.clone());
        assert!(store.load(&q.fingerprint()).is_none());

        let status = rx.borrow();
        assert!(!status.is_running);
        assert_eq!(status.phase, Phase::Completed);
        assert!(status.result.is_some());
    }

    #[tokio::test]
    async fn test_permanent_detail_failure_becomes_placeholder() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("checkpoints"));
        let (session, _rx) = session(&config);
        let q = query();
        let ids = eleven_ids();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let fetch = ScriptedFetch::new();
        fetch.script(&race_card_url(&q), Ok(listing_html(&id_refs)));
        fetch.script(VETERINARY_URL, Ok(empty_vet_html()));
        for id in &ids {
            if id == "K107" {
                fetch.script(
                    &detail_url(id),
                    Err(ScrapeError::PermanentFetch("404".into())),
                );
            } else {
                fetch.script(&detail_url(id), Ok(detail_html()));
            }
        }

        let result = session.run(&fetch, &q, None).await.unwrap();

        // All eleven present; the failed one flagged, not dropped.
        assert_eq!(result.horses.len(), 11);
        let failed = &result.horses[6];
        assert_eq!(failed.horse_id, "K107");
        assert!(failed.detail_error.is_some());
        assert!(failed.past_runs.is_empty());
        assert_eq!(
            result.horses.iter().filter(|h| h.detail_error.is_some()).count(),
            1
        );
        // Permanent failure is not retried.
        assert_eq!(fetch.calls(), 13);
    }

    #[tokio::test]
    async fn test_resume_fetches_only_missing_horses() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("checkpoints"));
        let q = query();
        let ids = eleven_ids();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        // Four horses already checkpointed from an earlier session.
        let store = CheckpointStore::new(config.checkpoint_dir.clone());
        let mut checkpoint = Checkpoint::new(q.fingerprint());
        for id in ids.iter().take(4) {
            let stub = HorseStub {
                horse_id: id.clone(),
                name: format!("馬{id}"),
                ..Default::default()
            };
            checkpoint.record(id, HorseRecord::from_stub(&stub));
        }
        store.save(&checkpoint).unwrap();

        let fetch = ScriptedFetch::new();
        fetch.script(&race_card_url(&q), Ok(listing_html(&id_refs)));
        fetch.script(VETERINARY_URL, Ok(empty_vet_html()));
        for id in ids.iter().skip(4) {
            fetch.script(&detail_url(id), Ok(detail_html()));
        }

        let (session, _rx) = session(&config);
        let result = session.run(&fetch, &q, None).await.unwrap();

        // 1 listing + 1 veterinary page + 7 remaining details.
        assert_eq!(fetch.calls(), 9);
        let got: Vec<&str> = result.horses.iter().map(|h| h.horse_id.as_str()).collect();
        assert_eq!(got, id_refs);
    }

    #[tokio::test]
    async fn test_complete_checkpoint_replays_identical_document() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("checkpoints"));
        let q = query();
        let ids = eleven_ids();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        // First session scrapes the whole card.
        let fetch = ScriptedFetch::new();
        fetch.script(&race_card_url(&q), Ok(listing_html(&id_refs)));
        fetch.script(VETERINARY_URL, Ok(vet_html()));
        for id in &ids {
            fetch.script(&detail_url(id), Ok(detail_html()));
        }
        let (session_one, _rx) = session(&config);
        let first = session_one.run(&fetch, &q, None).await.unwrap();

        // Rebuild a complete checkpoint from the first run's records, as
        // if the session died after the last horse but before cleanup.
        let store = CheckpointStore::new(config.checkpoint_dir.clone());
        let mut checkpoint = Checkpoint::new(&q.fingerprint());
        for record in &first.horses {
            checkpoint.record(&record.horse_id, record.clone());
        }
        store.save(&checkpoint).unwrap();

        // Second session has only the listing scripted: detail pages and
        // the veterinary page must not be touched.
        let replay = ScriptedFetch::new();
        replay.script(&race_card_url(&q), Ok(listing_html(&id_refs)));
        let (session_two, _rx) = session(&config);
        let second = session_two.run(&replay, &q, None).await.unwrap();
        assert_eq!(replay.calls(), 1);

        // Apart from the scrape timestamp, the replayed document is
        // byte-for-byte the first one.
        let mut a = serde_json::to_value(&first).unwrap();
        let mut b = serde_json::to_value(&second).unwrap();
        a["scrapeInfo"]["scrapedAt"] = serde_json::Value::Null;
        b["scrapeInfo"]["scrapedAt"] = serde_json::Value::Null;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_checkpoint() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("checkpoints"));
        let q = query();
        let ids = eleven_ids();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        // Partial progress from before the cancel.
        let store = CheckpointStore::new(config.checkpoint_dir.clone());
        let mut checkpoint = Checkpoint::new(q.fingerprint());
        let stub = HorseStub {
            horse_id: ids[0].clone(),
            ..Default::default()
        };
        checkpoint.record(&ids[0], HorseRecord::from_stub(&stub));
        store.save(&checkpoint).unwrap();

        let fetch = ScriptedFetch::new();
        fetch.script(&race_card_url(&q), Ok(listing_html(&id_refs)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (handle, rx) = status::channel();
        let session = ScrapeSession::new(&config, handle, cancel);

        let err = session.run(&fetch, &q, None).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Cancelled));
        assert_eq!(rx.borrow().phase, Phase::Cancelled);

        // Progress survives for the next session, and the lock is free.
        let kept = store.load(&q.fingerprint()).unwrap();
        assert!(kept.contains(&ids[0]));
        let _lock = store.acquire(&q.fingerprint()).unwrap();
    }

    #[tokio::test]
    async fn test_empty_listing_is_fatal() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("checkpoints"));
        let (session, rx) = session(&config);
        let q = query();

        let fetch = ScriptedFetch::new();
        fetch.script(&race_card_url(&q), Ok("<html><body>暫無資料</body></html>".into()));

        let out = dir.path().join("out/result.json");
        let err = session.run(&fetch, &q, Some(&out)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::EmptyListing));
        assert!(!out.exists());
        assert_eq!(rx.borrow().phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_locked_fingerprint_refused() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("checkpoints"));
        let q = query();

        let store = CheckpointStore::new(config.checkpoint_dir.clone());
        let _lock = store.acquire(&q.fingerprint()).unwrap();

        let (session, _rx) = session(&config);
        let fetch = ScriptedFetch::new();
        let err = session.run(&fetch, &q, None).await.unwrap_err();
        assert!(matches!(err, ScrapeError::CheckpointLocked { .. }));
        // Nothing was fetched.
        assert_eq!(fetch.calls(), 0);
    }

    #[test]
    fn test_default_output_path() {
        let path = default_output_path(&query());
        assert_eq!(path, PathBuf::from("data/results/20250917_HV_R4.json"));
    }
}
