// =============================================================================
// Quote Cache (C3) — durable key->row store of latest quote per instrument
// =============================================================================
//
// Backed by an embedded SQLite database in WAL journal mode (readers never
// block writers), plus an in-memory mirror that reflects the durable tier
// after every successful write (§9 design note: "keep a two-tier model...
// behind a single interface").

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cache::retry::{with_retry, RetryConfig};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::model::Quote;

struct CachedQuote {
    quote: Quote,
    cached_at: DateTime<Utc>,
}

/// Durable, process-safe key->row store of the latest quote per instrument.
pub struct QuoteCache {
    conn: Mutex<Connection>,
    mirror: RwLock<HashMap<String, CachedQuote>>,
    retry_cfg: RetryConfig,
}

impl QuoteCache {
    /// Open (creating if needed) the quote cache at `path`.
    pub fn open(path: impl AsRef<Path>, cfg: &MonitorConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", cfg.sqlite_timeout_secs as i64 * 1000)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS quote_cache (
                symbol TEXT PRIMARY KEY,
                quote_data TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )",
        )?;

        let cache = Self {
            conn: Mutex::new(conn),
            mirror: RwLock::new(HashMap::new()),
            retry_cfg: RetryConfig::from_config(cfg),
        };
        cache.hydrate_mirror()?;
        Ok(cache)
    }

    /// In-memory only — used by tests that don't need a real file.
    pub fn open_in_memory(cfg: &MonitorConfig) -> Result<Self> {
        Self::open(":memory:", cfg)
    }

    fn hydrate_mirror(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT symbol, quote_data, cached_at FROM quote_cache")?;
        let rows = stmt.query_map([], |row| {
            let symbol: String = row.get(0)?;
            let quote_data: String = row.get(1)?;
            let cached_at: String = row.get(2)?;
            Ok((symbol, quote_data, cached_at))
        })?;

        let mut mirror = self.mirror.write();
        for row in rows {
            let (symbol, quote_data, cached_at) = row?;
            if let (Ok(quote), Ok(cached_at)) = (
                serde_json::from_str::<Quote>(&quote_data),
                DateTime::parse_from_rfc3339(&cached_at).map(|t| t.with_timezone(&Utc)),
            ) {
                mirror.insert(symbol, CachedQuote { quote, cached_at });
            }
        }
        Ok(())
    }

    /// Atomic upsert (by primary key `symbol`) of all rows, in one bounded
    /// lock acquisition. Row-level insert-or-replace — never a full-table
    /// delete-then-insert (spec.md §4.2 upsert performance rule).
    pub fn put_batch(&self, quotes: &[Quote], cached_at: DateTime<Utc>) -> Result<()> {
        let cached_at_str = cached_at.to_rfc3339();

        with_retry(&self.retry_cfg, "quote_cache.put_batch", || {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO quote_cache (symbol, quote_data, cached_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(symbol) DO UPDATE SET quote_data = excluded.quote_data, cached_at = excluded.cached_at",
                )?;
                for quote in quotes {
                    let quote_data = serde_json::to_string(quote).map_err(|e| {
                        rusqlite::Error::ToSqlConversionFailure(Box::new(e))
                    })?;
                    stmt.execute(rusqlite::params![quote.symbol, quote_data, cached_at_str])?;
                }
            }
            tx.commit()
        })?;

        let mut mirror = self.mirror.write();
        for quote in quotes {
            mirror.insert(
                quote.symbol.clone(),
                CachedQuote {
                    quote: quote.clone(),
                    cached_at,
                },
            );
        }
        Ok(())
    }

    /// Current cached row per symbol; missing keys are absent from the
    /// result. Served from the in-memory mirror — reads never block writes
    /// of other instruments.
    pub fn get_batch(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let mirror = self.mirror.read();
        symbols
            .iter()
            .filter_map(|s| mirror.get(s).map(|c| (s.clone(), c.quote.clone())))
            .collect()
    }

    pub fn age(&self, symbol: &str) -> Option<ChronoDuration> {
        let mirror = self.mirror.read();
        mirror.get(symbol).map(|c| Utc::now().signed_duration_since(c.cached_at))
    }

    /// Offline eviction job: remove rows older than `max_age`. On
    /// `eviction_weekday` also runs a `VACUUM` compaction pass.
    pub fn evict_older_than(&self, max_age: ChronoDuration, today_weekday: u32, eviction_weekday: u32) -> Result<usize> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        let deleted = with_retry(&self.retry_cfg, "quote_cache.evict", || {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM quote_cache WHERE cached_at < ?1", [&cutoff])
        })?;

        {
            let mut mirror = self.mirror.write();
            let cutoff_ts = Utc::now() - max_age;
            mirror.retain(|_, v| v.cached_at >= cutoff_ts);
        }

        if today_weekday == eviction_weekday {
            let conn = self.conn.lock().unwrap();
            if let Err(e) = conn.execute_batch("VACUUM") {
                warn!(error = %e, "quote cache compaction (VACUUM) failed");
            } else {
                info!("quote cache compacted");
            }
        }
        Ok(deleted)
    }
}
