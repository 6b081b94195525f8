//! Durable checkpoint store for resumable scrape sessions.
//!
//! One JSON file per query fingerprint. Saved after each completed
//! horse so a crash loses at most the in-flight one. A lock file
//! enforces the single-writer policy per fingerprint.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, ScrapeError};
use crate::types::HorseRecord;

/// Locks older than this are considered abandoned by a crashed session.
const LOCK_TTL_HOURS: i64 = 2;

/// Partial progress for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub fingerprint: String,
    /// Horse ids whose detail work is done (including placeholders for
    /// permanently failed detail pages; a resume must not re-attempt
    /// those).
    pub completed: BTreeSet<String>,
    pub horses: BTreeMap<String, HorseRecord>,
    pub last_updated: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            completed: BTreeSet::new(),
            horses: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Record one completed horse.
    pub fn record(&mut self, horse_id: &str, record: HorseRecord) {
        self.completed.insert(horse_id.to_string());
        self.horses.insert(horse_id.to_string(), record);
        self.last_updated = Utc::now();
    }

    pub fn contains(&self, horse_id: &str) -> bool {
        self.completed.contains(horse_id)
    }
}

/// Guard for the single-writer lock on one fingerprint. Dropping it
/// releases the lock.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release checkpoint lock");
        }
    }
}

/// File-based checkpoint store.
pub struct CheckpointStore {
    base_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn checkpoint_path(&self, fingerprint: &str) -> PathBuf {
        self.base_dir.join(format!("{fingerprint}.json"))
    }

    fn lock_path(&self, fingerprint: &str) -> PathBuf {
        self.base_dir.join(format!("{fingerprint}.lock"))
    }

    /// Load the checkpoint for a fingerprint.
    ///
    /// An unreadable checkpoint is treated as absent: starting from
    /// scratch is safer than trusting corrupt state.
    pub fn load(&self, fingerprint: &str) -> Option<Checkpoint> {
        let path = self.checkpoint_path(fingerprint);
        if !path.exists() {
            return None;
        }

        match Self::read_checkpoint(&path) {
            Ok(checkpoint) => {
                info!(
                    fingerprint,
                    completed = checkpoint.completed.len(),
                    "checkpoint loaded"
                );
                Some(checkpoint)
            }
            Err(e) => {
                warn!(
                    fingerprint,
                    error = %ScrapeError::CheckpointCorrupt(e.to_string()),
                    "discarding unreadable checkpoint"
                );
                None
            }
        }
    }

    fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist the checkpoint atomically (write-then-rename).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        let path = self.checkpoint_path(&checkpoint.fingerprint);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
        fs::rename(&tmp, &path)?;
        debug!(
            fingerprint = %checkpoint.fingerprint,
            completed = checkpoint.completed.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Remove the checkpoint once the final result is persisted.
    pub fn clear(&self, fingerprint: &str) -> Result<()> {
        let path = self.checkpoint_path(fingerprint);
        if path.exists() {
            fs::remove_file(&path)?;
            info!(fingerprint, "checkpoint cleared");
        }
        Ok(())
    }

    /// Take the single-writer lock for a fingerprint.
    ///
    /// Refuses when an unexpired lock exists: concurrent sessions on
    /// one fingerprint are not supported.
    pub fn acquire(&self, fingerprint: &str) -> Result<SessionLock> {
        fs::create_dir_all(&self.base_dir)?;
        let path = self.lock_path(fingerprint);

        if let Ok(content) = fs::read_to_string(&path) {
            let held_since = content.trim().parse::<DateTime<Utc>>().ok();
            let expired = match held_since {
                Some(at) => Utc::now() - at > Duration::hours(LOCK_TTL_HOURS),
                // Unparseable lock content counts as abandoned.
                None => true,
            };
            if !expired {
                return Err(ScrapeError::CheckpointLocked {
                    fingerprint: fingerprint.to_string(),
                });
            }
            warn!(fingerprint, "taking over expired checkpoint lock");
        }

        fs::write(&path, Utc::now().to_rfc3339())?;
        Ok(SessionLock { path })
    }
}
