// =============================================================================
// Price Enrichment Worker (C11)
// =============================================================================
//
// Background worker that fills in the +2m / +10m / EOD price slots for each
// emitted alert, strictly from historical candle data — never from a live
// quote (spec.md §4.10's "never write the current live last-price" rule).

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::HistoryCache;
use crate::calendar::Calendar;
use crate::config::MonitorConfig;
use crate::model::{Candle, EnrichmentRecord, EnrichmentSlot, EnrichmentStatus, IntervalKind};
use crate::provider::QuoteProvider;

/// In-process table of enrichment records awaiting completion, fed by the
/// sink fanout's enrichment queue. Owns the receiver half of that queue so
/// callers can drain it without juggling a separately-held `&mut` across a
/// repeatedly-invoked scheduler closure.
pub struct EnrichmentStore {
    records: RwLock<HashMap<u64, EnrichmentRecord>>,
    rx: parking_lot::Mutex<mpsc::UnboundedReceiver<EnrichmentRecord>>,
    max_slot_retries: u32,
}

impl EnrichmentStore {
    pub fn new(cfg: &MonitorConfig, rx: mpsc::UnboundedReceiver<EnrichmentRecord>) -> Self {
        Self { records: RwLock::new(HashMap::new()), rx: parking_lot::Mutex::new(rx), max_slot_retries: cfg.max_slot_retries }
    }

    /// Drain everything currently queued into the table. Call this once per
    /// worker tick before scanning.
    pub fn drain_queue(&self) {
        let mut rx = self.rx.lock();
        while let Ok(record) = rx.try_recv() {
            self.records.write().insert(record.row_id, record);
        }
    }

    /// Rows that still have at least one empty slot and have not exhausted
    /// their retry budget.
    fn pending(&self) -> Vec<EnrichmentRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.status() != EnrichmentStatus::Complete && r.retries < self.max_slot_retries)
            .cloned()
            .collect()
    }

    /// Candle-bucket identity the slot's value is read from — for EOD this
    /// is midnight of the alert's local calendar date, matching
    /// `IntervalKind::D1` bucketing. This is deliberately distinct from
    /// "when the data is actually available" ([`Self::slot_ready_at`]):
    /// the daily candle is keyed to midnight but doesn't exist until the
    /// session closes.
    fn slot_target(slot: EnrichmentSlot, alert_ts: DateTime<Utc>, calendar: &Calendar) -> DateTime<Utc> {
        match slot {
            EnrichmentSlot::Plus2m => alert_ts + chrono::Duration::minutes(2),
            EnrichmentSlot::Plus10m => alert_ts + chrono::Duration::minutes(10),
            EnrichmentSlot::Eod => {
                let date = alert_ts.with_timezone(&calendar.zone()).date_naive();
                date.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()).and_utc()
            }
        }
    }

    /// Earliest instant at which the slot's data can actually exist. For
    /// +2m/+10m this is the bucket target itself; for EOD it's the
    /// session's real close time, not midnight of the bucket's date.
    fn slot_ready_at(slot: EnrichmentSlot, alert_ts: DateTime<Utc>, calendar: &Calendar) -> DateTime<Utc> {
        match slot {
            EnrichmentSlot::Plus2m | EnrichmentSlot::Plus10m => Self::slot_target(slot, alert_ts, calendar),
            EnrichmentSlot::Eod => {
                let date = alert_ts.with_timezone(&calendar.zone()).date_naive();
                calendar.session_boundaries(date).1
            }
        }
    }

    fn slot_interval(slot: EnrichmentSlot) -> IntervalKind {
        match slot {
            EnrichmentSlot::Plus2m | EnrichmentSlot::Plus10m => IntervalKind::M1,
            EnrichmentSlot::Eod => IntervalKind::D1,
        }
    }

    /// Find the candle whose bucket start is within ±1 minute of `target`.
    fn find_candle(candles: &[Candle], target: DateTime<Utc>) -> Option<&Candle> {
        candles
            .iter()
            .map(|c| (c, (c.bucket_start - target).num_seconds().abs()))
            .filter(|(_, diff)| *diff <= 60)
            .min_by_key(|(_, diff)| *diff)
            .map(|(c, _)| c)
    }

    /// One scan pass: for each pending record, try to fill every still-empty
    /// slot from `history`, falling back to `provider` on a cache miss.
    /// Slots already filled are left untouched (write-once).
    pub async fn run_once<P: QuoteProvider>(
        &self,
        history: &HistoryCache,
        provider: &P,
        calendar: &Calendar,
        now: DateTime<Utc>,
    ) {
        for record in self.pending() {
            let mut updated = record.clone();
            let mut any_filled = false;
            let mut any_missing = false;

            for slot in [EnrichmentSlot::Plus2m, EnrichmentSlot::Plus10m, EnrichmentSlot::Eod] {
                if updated.slot_value(slot).is_some() {
                    continue;
                }
                if Self::slot_ready_at(slot, updated.alert_timestamp, calendar) > now {
                    continue; // data for this slot can't exist yet
                }
                let target = Self::slot_target(slot, updated.alert_timestamp, calendar);

                let interval = Self::slot_interval(slot);
                let window_from = target - chrono::Duration::minutes(2);
                let window_to = target + chrono::Duration::minutes(2);

                let cached = history
                    .get(&updated.instrument, interval, window_from.date_naive(), window_to.date_naive())
                    .ok()
                    .flatten();

                let candles = match cached {
                    Some(c) => c,
                    None => {
                        let instrument = crate::model::Instrument {
                            symbol: updated.instrument.clone(),
                            exchange: "NSE".to_string(),
                            kind: crate::model::InstrumentKind::Equity,
                            expiry: None,
                            strike: None,
                            option_type: None,
                            underlying: None,
                        };
                        match provider.historical(&instrument, interval, window_from, window_to).await {
                            Ok(c) => {
                                let _ = history.put(
                                    &updated.instrument,
                                    interval,
                                    window_from.date_naive(),
                                    window_to.date_naive(),
                                    &c,
                                );
                                c
                            }
                            Err(e) => {
                                debug!(instrument = %updated.instrument, %slot, error = %e, "enrichment candle fetch failed");
                                Vec::new()
                            }
                        }
                    }
                };

                match Self::find_candle(&candles, target) {
                    Some(candle) => {
                        updated.fill_slot(slot, candle.close);
                        any_filled = true;
                    }
                    None => {
                        any_missing = true;
                    }
                }
            }

            if any_missing {
                updated.retries += 1;
                if updated.retries >= self.max_slot_retries {
                    warn!(row_id = updated.row_id, instrument = %updated.instrument, "enrichment retries exhausted, slot(s) left blank");
                }
            }

            if any_filled || any_missing {
                self.records.write().insert(updated.row_id, updated);
            }
        }
    }

    pub fn status_of(&self, row_id: u64) -> Option<EnrichmentStatus> {
        self.records.read().get(&row_id).map(|r| r.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::model::{Instrument, Quote};
    use std::collections::HashMap as StdHashMap;

    struct StubProvider {
        candles: Vec<Candle>,
    }

    impl QuoteProvider for StubProvider {
        async fn quote_batch(&self, _instruments: &[Instrument]) -> Result<StdHashMap<String, Quote>> {
            Ok(StdHashMap::new())
        }
        async fn historical(
            &self,
            _instrument: &Instrument,
            _interval: IntervalKind,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Candle>> {
            Ok(self.candles.clone())
        }
        async fn instrument_metadata(&self) -> Result<Vec<Instrument>> {
            Ok(Vec::new())
        }
    }

    fn candle(bucket_start: DateTime<Utc>, interval: IntervalKind, close: f64) -> Candle {
        Candle { instrument_token: "A".into(), interval, bucket_start, open: close, high: close, low: close, close, volume: 10.0 }
    }

    #[tokio::test]
    async fn fills_plus_2m_slot_from_provider_on_cache_miss() {
        let cfg = MonitorConfig::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let store = EnrichmentStore::new(&cfg, rx);
        let history = HistoryCache::open_in_memory(&cfg).unwrap();
        let calendar = Calendar::from_config(&cfg);
        let alert_ts = Utc::now() - chrono::Duration::minutes(5);
        let target = alert_ts + chrono::Duration::minutes(2);
        let provider = StubProvider { candles: vec![candle(target, IntervalKind::M1, 101.5)] };

        store.records.write().insert(1, EnrichmentRecord::new(1, "A", alert_ts));
        store.run_once(&history, &provider, &calendar, Utc::now()).await;

        assert_eq!(store.status_of(1), Some(EnrichmentStatus::Partial));
        let rec = store.records.read().get(&1).unwrap().clone();
        assert_eq!(rec.price_plus_2m, Some(101.5));
    }

    #[tokio::test]
    async fn never_fills_before_target_instant_has_passed() {
        let cfg = MonitorConfig::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let store = EnrichmentStore::new(&cfg, rx);
        let history = HistoryCache::open_in_memory(&cfg).unwrap();
        let calendar = Calendar::from_config(&cfg);
        let alert_ts = Utc::now(); // +2m target is in the future
        let provider = StubProvider { candles: vec![] };

        store.records.write().insert(1, EnrichmentRecord::new(1, "A", alert_ts));
        store.run_once(&history, &provider, &calendar, Utc::now()).await;

        assert_eq!(store.status_of(1), Some(EnrichmentStatus::Pending));
    }

    #[tokio::test]
    async fn already_filled_slot_is_never_rewritten() {
        let cfg = MonitorConfig::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let store = EnrichmentStore::new(&cfg, rx);
        let history = HistoryCache::open_in_memory(&cfg).unwrap();
        let calendar = Calendar::from_config(&cfg);
        let alert_ts = Utc::now() - chrono::Duration::minutes(15);

        let mut rec = EnrichmentRecord::new(1, "A", alert_ts);
        rec.fill_slot(EnrichmentSlot::Plus2m, 42.0);
        store.records.write().insert(1, rec);

        let provider = StubProvider { candles: vec![candle(alert_ts + chrono::Duration::minutes(2), IntervalKind::M1, 999.0)] };
        store.run_once(&history, &provider, &calendar, Utc::now()).await;

        let rec = store.records.read().get(&1).unwrap().clone();
        assert_eq!(rec.price_plus_2m, Some(42.0));
    }

    #[tokio::test]
    async fn missing_candle_increments_retries_and_leaves_slot_blank() {
        let cfg = MonitorConfig::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let store = EnrichmentStore::new(&cfg, rx);
        let history = HistoryCache::open_in_memory(&cfg).unwrap();
        let calendar = Calendar::from_config(&cfg);
        let alert_ts = Utc::now() - chrono::Duration::minutes(15);
        let provider = StubProvider { candles: vec![] };

        store.records.write().insert(1, EnrichmentRecord::new(1, "A", alert_ts));
        store.run_once(&history, &provider, &calendar, Utc::now()).await;

        let rec = store.records.read().get(&1).unwrap().clone();
        assert_eq!(rec.retries, 1);
        assert!(rec.price_plus_2m.is_none());
    }

    #[tokio::test]
    async fn eod_slot_is_not_attempted_before_session_close() {
        let cfg = MonitorConfig::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let store = EnrichmentStore::new(&cfg, rx);
        let history = HistoryCache::open_in_memory(&cfg).unwrap();
        let calendar = Calendar::from_config(&cfg);

        // 10:00 IST on a Wednesday; +2m/+10m targets have passed but the
        // 15:30 IST close has not.
        let alert_ts = chrono::NaiveDate::from_ymd_opt(2026, 1, 21).unwrap().and_hms_opt(4, 30, 0).unwrap().and_utc();
        let now = chrono::NaiveDate::from_ymd_opt(2026, 1, 21).unwrap().and_hms_opt(9, 0, 0).unwrap().and_utc();
        let provider = StubProvider {
            candles: vec![
                candle(alert_ts + chrono::Duration::minutes(2), IntervalKind::M1, 101.0),
                candle(alert_ts + chrono::Duration::minutes(10), IntervalKind::M1, 102.0),
            ],
        };

        store.records.write().insert(1, EnrichmentRecord::new(1, "A", alert_ts));
        store.run_once(&history, &provider, &calendar, now).await;

        let rec = store.records.read().get(&1).unwrap().clone();
        assert_eq!(rec.price_plus_2m, Some(101.0));
        assert_eq!(rec.price_plus_10m, Some(102.0));
        assert!(rec.price_eod.is_none());
        assert_eq!(rec.retries, 0, "EOD slot should be skipped, not counted as missing, before close");
    }

    #[tokio::test]
    async fn eod_slot_fills_once_session_has_closed() {
        let cfg = MonitorConfig::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let store = EnrichmentStore::new(&cfg, rx);
        let history = HistoryCache::open_in_memory(&cfg).unwrap();
        let calendar = Calendar::from_config(&cfg);

        let alert_ts = chrono::NaiveDate::from_ymd_opt(2026, 1, 21).unwrap().and_hms_opt(4, 30, 0).unwrap().and_utc();
        // 16:00 IST — after the 15:30 IST close.
        let now = chrono::NaiveDate::from_ymd_opt(2026, 1, 21).unwrap().and_hms_opt(10, 30, 0).unwrap().and_utc();
        let eod_bucket = chrono::NaiveDate::from_ymd_opt(2026, 1, 21).unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let provider = StubProvider {
            candles: vec![
                candle(alert_ts + chrono::Duration::minutes(2), IntervalKind::M1, 101.0),
                candle(alert_ts + chrono::Duration::minutes(10), IntervalKind::M1, 102.0),
                candle(eod_bucket, IntervalKind::D1, 2530.0),
            ],
        };

        store.records.write().insert(1, EnrichmentRecord::new(1, "A", alert_ts));
        store.run_once(&history, &provider, &calendar, now).await;

        assert_eq!(store.status_of(1), Some(EnrichmentStatus::Complete));
        let rec = store.records.read().get(&1).unwrap().clone();
        assert_eq!(rec.price_eod, Some(2530.0));
    }

    #[tokio::test]
    async fn drain_queue_moves_records_from_channel_into_table() {
        let cfg = MonitorConfig::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let store = EnrichmentStore::new(&cfg, rx);
        tx.send(EnrichmentRecord::new(7, "A", Utc::now())).unwrap();
        store.drain_queue();
        assert!(store.records.read().contains_key(&7));
    }
}
