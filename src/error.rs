//! Error taxonomy for the scrape pipeline.
//!
//! The retry controller only ever retries transient failures; everything
//! else propagates to the caller with its classification intact.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Likely to succeed on retry: timeouts, connection resets, rate limits.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// Retrying cannot help: rejected request, missing page.
    #[error("permanent fetch failure: {0}")]
    PermanentFetch(String),

    /// Two columns on one page mapped to the same canonical field.
    #[error("ambiguous header: '{header}' matched columns {first} and {second}")]
    AmbiguousHeader {
        header: String,
        first: usize,
        second: usize,
    },

    /// The race card yielded zero usable rows. Fatal to the session.
    #[error("race card contained no usable entries")]
    EmptyListing,

    /// One horse's detail page could not be processed. Non-fatal: the
    /// session records a placeholder and continues.
    #[error("detail extraction failed for horse {horse_id}: {message}")]
    HorseDetail { horse_id: String, message: String },

    /// The assembled result failed validation and must not be persisted.
    #[error("result validation failed: {0}")]
    Validation(String),

    /// Checkpoint file exists but cannot be read. Treated as absent by
    /// the store; surfaces only in logs.
    #[error("checkpoint unreadable: {0}")]
    CheckpointCorrupt(String),

    /// Another session holds an unexpired lock on this fingerprint.
    #[error("checkpoint for {fingerprint} is locked by another session")]
    CheckpointLocked { fingerprint: String },

    /// The session was cancelled; the checkpoint is left intact.
    #[error("scrape session cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Whether the retry controller may re-attempt the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScrapeError::TransientFetch(_))
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
