// =============================================================================
// History Cache (C4) — durable store of historical candle series
// =============================================================================
//
// Keyed by (instrument_token, interval, from_date, to_date); each row holds
// the full candle series for that window as a JSON blob. TTL varies by
// instrument (VIX gets a longer TTL — spec.md §4.2), and the table is
// capped at `history_row_cap` rows via LRU eviction keyed on last access.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::cache::retry::{with_retry, RetryConfig};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::model::{Candle, IntervalKind};

fn cache_key(instrument_token: &str, interval: IntervalKind, from: NaiveDate, to: NaiveDate) -> String {
    format!("{instrument_token}|{}|{from}|{to}", interval.as_wire_str())
}

/// Durable store of historical candle windows, with per-key TTL and an LRU
/// cap on total rows.
pub struct HistoryCache {
    conn: Mutex<Connection>,
    retry_cfg: RetryConfig,
    default_ttl: ChronoDuration,
    vix_ttl: ChronoDuration,
    row_cap: usize,
}

impl HistoryCache {
    pub fn open(path: impl AsRef<Path>, cfg: &MonitorConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", cfg.sqlite_timeout_secs as i64 * 1000)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history_cache (
                cache_key TEXT PRIMARY KEY,
                candles TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                last_access TEXT NOT NULL
            )",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            retry_cfg: RetryConfig::from_config(cfg),
            default_ttl: ChronoDuration::hours(cfg.history_default_ttl_hours),
            vix_ttl: ChronoDuration::hours(cfg.history_vix_ttl_hours),
            row_cap: cfg.history_row_cap,
        })
    }

    pub fn open_in_memory(cfg: &MonitorConfig) -> Result<Self> {
        Self::open(":memory:", cfg)
    }

    fn ttl_for(&self, instrument_token: &str) -> ChronoDuration {
        if instrument_token.eq_ignore_ascii_case("INDIA VIX") || instrument_token.eq_ignore_ascii_case("VIX") {
            self.vix_ttl
        } else {
            self.default_ttl
        }
    }

    /// Store a candle window, overwriting any prior entry for the same key.
    pub fn put(
        &self,
        instrument_token: &str,
        interval: IntervalKind,
        from: NaiveDate,
        to: NaiveDate,
        candles: &[Candle],
    ) -> Result<()> {
        let key = cache_key(instrument_token, interval, from, to);
        let now = Utc::now();
        let expires_at = now + self.ttl_for(instrument_token);
        let payload = serde_json::to_string(candles)?;

        with_retry(&self.retry_cfg, "history_cache.put", || {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO history_cache (cache_key, candles, cached_at, expires_at, last_access)
                 VALUES (?1, ?2, ?3, ?4, ?3)
                 ON CONFLICT(cache_key) DO UPDATE SET candles = excluded.candles, cached_at = excluded.cached_at,
                    expires_at = excluded.expires_at, last_access = excluded.last_access",
                rusqlite::params![key, payload, now.to_rfc3339(), expires_at.to_rfc3339()],
            )
        })?;

        self.enforce_row_cap()?;
        Ok(())
    }

    /// Fetch a cached window if present and not expired; bumps `last_access`
    /// for LRU purposes.
    pub fn get(
        &self,
        instrument_token: &str,
        interval: IntervalKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<Vec<Candle>>> {
        let key = cache_key(instrument_token, interval, from, to);
        let now = Utc::now();

        let row: Option<(String, String)> = with_retry(&self.retry_cfg, "history_cache.get", || {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT candles, expires_at FROM history_cache WHERE cache_key = ?1",
                [&key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map(Some)
            .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })
        })?;

        let Some((payload, expires_at)) = row else {
            return Ok(None);
        };
        let expires_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);
        if expires_at <= now {
            return Ok(None);
        }

        with_retry(&self.retry_cfg, "history_cache.touch", || {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE history_cache SET last_access = ?1 WHERE cache_key = ?2",
                rusqlite::params![now.to_rfc3339(), key],
            )
        })?;

        let candles: Vec<Candle> = serde_json::from_str(&payload)?;
        Ok(Some(candles))
    }

    /// Drop the least-recently-used rows once the table exceeds `row_cap`.
    fn enforce_row_cap(&self) -> Result<()> {
        let row_cap = self.row_cap;
        let deleted = with_retry(&self.retry_cfg, "history_cache.enforce_row_cap", || {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM history_cache WHERE cache_key IN (
                    SELECT cache_key FROM history_cache
                    ORDER BY last_access ASC
                    LIMIT MAX(0, (SELECT COUNT(*) FROM history_cache) - ?1)
                )",
                [row_cap as i64],
            )
        })?;
        if deleted > 0 {
            info!(deleted, "history cache evicted rows over row cap");
        }
        Ok(())
    }

    /// Remove all expired rows, independent of the row cap.
    pub fn evict_expired(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        with_retry(&self.retry_cfg, "history_cache.evict_expired", || {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM history_cache WHERE expires_at <= ?1", [&now])
        })
    }
}
