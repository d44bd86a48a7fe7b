// =============================================================================
// Central Collector (C5) — the single writer of quotes into C3/C4
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::cache::QuoteCache;
use crate::calendar::Calendar;
use crate::config::MonitorConfig;
use crate::model::Instrument;
use crate::provider::{batch_instruments, QuoteProvider, RateLimiter};

/// Collector status, exposed to downstream readers for staleness detection
/// (spec.md §4.4 step 6).
#[derive(Debug, Clone)]
pub struct CollectorStatus {
    pub last_collection_ts: Option<DateTime<Utc>>,
    pub status: String,
}

impl Default for CollectorStatus {
    fn default() -> Self {
        Self { last_collection_ts: None, status: "never run".to_string() }
    }
}

/// Single logical writer tying C2 (provider) to C3 (quote cache). Exactly
/// one instance should run per process.
pub struct Collector<P> {
    provider: P,
    cache: std::sync::Arc<QuoteCache>,
    calendar: Calendar,
    rate_limiter: RateLimiter,
    batch_size: usize,
    max_retries: u32,
    status: RwLock<CollectorStatus>,
}

impl<P: QuoteProvider> Collector<P> {
    pub fn new(provider: P, cache: std::sync::Arc<QuoteCache>, calendar: Calendar, cfg: &MonitorConfig) -> Self {
        Self {
            provider,
            cache,
            calendar,
            rate_limiter: RateLimiter::new(cfg.max_req_per_sec),
            batch_size: cfg.batch_size,
            max_retries: cfg.max_retries,
            status: RwLock::new(CollectorStatus::default()),
        }
    }

    pub fn status(&self) -> CollectorStatus {
        self.status.read().clone()
    }

    /// `true` if `last_collection_ts` is at least `stale_after_ticks` ticks
    /// old relative to `now` (spec.md §4.4: downstream readers should fall
    /// back to direct provider queries past this threshold).
    pub fn is_stale(&self, now: DateTime<Utc>, tick_interval: chrono::Duration, stale_after_ticks: i64) -> bool {
        match self.status.read().last_collection_ts {
            Some(last) => now.signed_duration_since(last) >= tick_interval * stale_after_ticks as i32,
            None => true,
        }
    }

    /// Run one collection tick over `universe`. A single batch failure does
    /// not fail the whole tick; a tick-wide failure is recorded in status
    /// but does not return an error (the scheduler keeps ticking).
    pub async fn tick(&self, universe: &[Instrument], now: DateTime<Utc>) {
        let tick_minute = Calendar::truncate_to_minute(now);
        let batches = batch_instruments(universe, self.batch_size);

        let mut collected = Vec::new();
        let mut batch_failures = 0usize;

        for batch in batches {
            self.rate_limiter.acquire().await;
            match self.fetch_with_retry(batch).await {
                Ok(quotes) => collected.extend(quotes.into_values()),
                Err(e) => {
                    batch_failures += 1;
                    warn!(error = %e, batch_len = batch.len(), "collector batch failed, continuing");
                }
            }
        }

        if collected.is_empty() && batch_failures > 0 {
            let msg = format!("all {batch_failures} batch(es) failed");
            error!(tick = %tick_minute, "{msg}");
            *self.status.write() = CollectorStatus { last_collection_ts: self.status.read().last_collection_ts, status: format!("error: {msg}") };
            return;
        }

        if let Err(e) = self.cache.put_batch(&collected, tick_minute) {
            error!(error = %e, "collector failed to write quote batch");
            *self.status.write() = CollectorStatus { last_collection_ts: self.status.read().last_collection_ts, status: format!("error: {e}") };
            return;
        }

        *self.status.write() = CollectorStatus {
            last_collection_ts: Some(tick_minute),
            status: if batch_failures > 0 { format!("partial: {batch_failures} batch(es) failed") } else { "ok".to_string() },
        };
    }

    async fn fetch_with_retry(
        &self,
        batch: &[Instrument],
    ) -> crate::error::Result<std::collections::HashMap<String, crate::model::Quote>> {
        let mut attempt = 0u32;
        loop {
            match self.provider.quote_batch(batch).await {
                Ok(quotes) => return Ok(quotes),
                Err(e) if attempt < self.max_retries => {
                    let backoff = std::time::Duration::from_millis(200 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                    info!(attempt, "retrying collector batch after failure: {e}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Trailing window (in trading days) averaged for the 1-minute variant's
/// `avg_daily_volume` filter input.
const ADV_LOOKBACK_DAYS: i64 = 20;

/// Average daily volume over the trailing [`ADV_LOOKBACK_DAYS`] days, read
/// from whatever daily candles are already cached in C4. `None` if nothing
/// is cached for this instrument yet (the caller treats that the same as an
/// unknown 5m/1m baseline: the filter it gates simply fails closed).
pub fn average_daily_volume(
    history: &crate::cache::HistoryCache,
    instrument_token: &str,
    today: chrono::NaiveDate,
) -> Option<f64> {
    let from = today - chrono::Duration::days(ADV_LOOKBACK_DAYS);
    let to = today - chrono::Duration::days(1);
    let candles = history
        .get(instrument_token, crate::model::IntervalKind::D1, from, to)
        .ok()
        .flatten()?;
    if candles.is_empty() {
        return None;
    }
    Some(candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64)
}
