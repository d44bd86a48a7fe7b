//! Closed error taxonomy for the monitoring substrate.
//!
//! All fallible operations in this crate return [`Result<T>`], an alias for
//! `std::result::Result<T, MonitorError>`. The variants correspond exactly
//! to the taxonomy in spec.md §7; each carries the context its handling
//! policy needs (retry counts, last error, offending path).

use std::fmt;

/// All possible errors produced by the monitoring substrate.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Transient provider failure; retried with backoff, surfaces as a
    /// tick-level WARN, does not halt the scheduler.
    #[error("quote provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Fatal for the current tick; the notifier receives a one-time
    /// "credentials expired" alert and the scheduler keeps ticking.
    #[error("quote provider authentication failed: {0}")]
    ProviderAuth(String),

    /// All lock-retry attempts against the cache were exhausted.
    #[error("cache locked after {attempts} attempt(s) on {op}")]
    CacheLocked { op: String, attempts: u32 },

    /// The on-disk store failed integrity checks; it has been renamed aside
    /// and a fresh one created.
    #[error("cache corrupt, recreated: {0}")]
    CacheCorrupt(String),

    /// `last_collection_ts` is older than 2 collector ticks.
    #[error("stale cache: last collection at {last_collection_ts}")]
    StaleCache { last_collection_ts: String },

    /// A detector precondition (e.g. no price 10 minutes ago this early in
    /// the session) was not met; the caller should silently skip that
    /// horizon for that instrument.
    #[error("detector precondition not met: {0}")]
    DetectorPrecondition(String),

    /// An enrichment candle was not yet available; the slot is left empty
    /// and retried up to `max_slot_retries`.
    #[error("enrichment candle missing for {instrument} at {target}")]
    EnrichmentMissing { instrument: String, target: String },

    /// Underlying SQLite error not otherwise classified above.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization failure — config files, cooldown snapshots,
    /// cached candle blobs.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem I/O failure (config load/save, atomic rename).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller supplied an invalid argument (closed-config validation,
    /// out-of-range parameters).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl MonitorError {
    /// True for errors a caller may sensibly retry (vs. ones that should be
    /// surfaced and abandoned).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::ProviderUnavailable(_) | MonitorError::CacheLocked { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Lightweight classification of a raw SQLite error used by the retry
/// wrapper to decide whether "database is locked" applies.
pub fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

impl fmt::Display for crate::model::EnrichmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            crate::model::EnrichmentSlot::Plus2m => "plus_2m",
            crate::model::EnrichmentSlot::Plus10m => "plus_10m",
            crate::model::EnrichmentSlot::Eod => "eod",
        };
        write!(f, "{s}")
    }
}
