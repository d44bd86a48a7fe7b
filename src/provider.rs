// =============================================================================
// Quote Provider (C2) — abstract brokerage data source + rate limiter
// =============================================================================
//
// The brokerage REST client itself is an external collaborator (spec.md §1
// Non-goals). This module only defines the trait boundary and the
// token-bucket rate limiter every caller of it must respect.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Candle, Instrument, IntervalKind, Quote};

/// Abstract interface onto a brokerage market-data API (C2).
#[allow(async_fn_in_trait)]
pub trait QuoteProvider: Send + Sync {
    /// Fetch the latest quote for each requested instrument.
    async fn quote_batch(&self, instruments: &[Instrument]) -> Result<HashMap<String, Quote>>;

    /// Fetch historical candles for one instrument between `from` and `to`
    /// at the given interval.
    async fn historical(
        &self,
        instrument: &Instrument,
        interval: IntervalKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Resolve the tradable universe to concrete instrument metadata (token,
    /// contract month, strike).
    async fn instrument_metadata(&self) -> Result<Vec<Instrument>>;
}

/// Simple token-bucket rate limiter enforcing `max_req_per_sec` (spec.md §6
/// rate-limit contract). `acquire` blocks the calling task until a token is
/// available; it never spin-waits (sleeps on a timer), per spec.md §5's
/// "no component spin-waits" rule.
pub struct RateLimiter {
    max_per_sec: f64,
    /// Nanoseconds since epoch at which the next token becomes available.
    next_slot_nanos: AtomicI64,
}

impl RateLimiter {
    pub fn new(max_per_sec: f64) -> Self {
        Self {
            max_per_sec: max_per_sec.max(0.001),
            next_slot_nanos: AtomicI64::new(Utc::now().timestamp_nanos_opt().unwrap_or(0)),
        }
    }

    /// Reserve the next available slot and sleep until it arrives.
    pub async fn acquire(&self) {
        let interval_nanos = (1_000_000_000.0 / self.max_per_sec) as i64;
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let slot = self
            .next_slot_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(std::cmp::max(prev, now) + interval_nanos)
            })
            .unwrap_or(now);

        let wait_nanos = slot - interval_nanos - now;
        if wait_nanos > 0 {
            tokio::time::sleep(std::time::Duration::from_nanos(wait_nanos as u64)).await;
        }
    }
}

/// Split a universe into provider-call batches no larger than `batch_size`
/// (spec.md §4.4 step 1, §8 invariant 6).
pub fn batch_instruments<'a>(
    universe: &'a [Instrument],
    batch_size: usize,
) -> Vec<&'a [Instrument]> {
    if batch_size == 0 {
        return vec![universe];
    }
    universe.chunks(batch_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstrumentKind;

    fn inst(symbol: &str) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            exchange: "NSE".to_string(),
            kind: InstrumentKind::Equity,
            expiry: None,
            strike: None,
            option_type: None,
            underlying: None,
        }
    }

    #[test]
    fn batching_respects_size_and_count() {
        let universe: Vec<Instrument> = (0..125).map(|i| inst(&format!("SYM{i}"))).collect();
        let batches = batch_instruments(&universe, 50);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 50);
        assert_eq!(batches[2].len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spaces_out_acquisitions() {
        let limiter = RateLimiter::new(2.0); // 2 req/s => 500ms apart
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(900));
    }
}
