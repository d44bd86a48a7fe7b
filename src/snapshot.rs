// =============================================================================
// Rolling Snapshot Store (C6) — per-instrument ring of minute-aligned points
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;

use crate::calendar::Calendar;
use crate::model::SnapshotPoint;

/// Longest horizon the ring needs to answer — 30 minutes, plus slack for
/// lookup tolerance and the occasional missed tick.
const RING_CAPACITY: usize = 40;

struct Ring {
    points: Vec<SnapshotPoint>,
    day: chrono::NaiveDate,
}

impl Ring {
    fn new(day: chrono::NaiveDate) -> Self {
        Self { points: Vec::with_capacity(RING_CAPACITY), day }
    }

    fn push(&mut self, point: SnapshotPoint) {
        if let Some(latest) = self.points.last() {
            if latest.cached_at >= point.cached_at {
                return; // idempotent: already have this tick or a later one
            }
        }
        self.points.push(point);
        if self.points.len() > RING_CAPACITY {
            self.points.remove(0);
        }
    }

    /// Entry whose `cached_at` is closest to `target`, within `tolerance`.
    fn nearest(&self, target: DateTime<Utc>, tolerance: ChronoDuration) -> Option<&SnapshotPoint> {
        self.points
            .iter()
            .map(|p| (p, (p.cached_at - target).num_seconds().abs()))
            .filter(|(_, diff)| *diff <= tolerance.num_seconds())
            .min_by_key(|(_, diff)| *diff)
            .map(|(p, _)| p)
    }
}

/// Per-instrument rolling snapshot ring, keyed by symbol.
pub struct SnapshotStore {
    rings: RwLock<HashMap<String, Ring>>,
    calendar: Calendar,
    lookup_tolerance: ChronoDuration,
}

impl SnapshotStore {
    pub fn new(calendar: Calendar) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            calendar,
            lookup_tolerance: ChronoDuration::minutes(1),
        }
    }

    /// Append the point for `symbol` at `cached_at == tick`. Resets the ring
    /// first if `tick`'s calendar date differs from the ring's current day.
    pub fn append(&self, symbol: &str, point: SnapshotPoint) {
        let day = point.cached_at.with_timezone(&self.calendar.zone()).date_naive();
        let mut rings = self.rings.write();
        let ring = rings.entry(symbol.to_string()).or_insert_with(|| Ring::new(day));
        if ring.day != day {
            *ring = Ring::new(day);
        }
        ring.push(point);
    }

    /// Latest point for `symbol`, i.e. `price_at(0)` / `volume_at(0)`.
    pub fn latest(&self, symbol: &str) -> Option<SnapshotPoint> {
        self.rings.read().get(symbol).and_then(|r| r.points.last().copied())
    }

    /// Price `k` minutes before the latest point, within ±1 minute.
    pub fn price_at(&self, symbol: &str, k: i64) -> Option<f64> {
        self.point_at(symbol, k).map(|p| p.price)
    }

    pub fn volume_at(&self, symbol: &str, k: i64) -> Option<f64> {
        self.point_at(symbol, k).map(|p| p.volume)
    }

    fn point_at(&self, symbol: &str, k: i64) -> Option<SnapshotPoint> {
        let rings = self.rings.read();
        let ring = rings.get(symbol)?;
        let latest = ring.points.last()?;
        let target = latest.cached_at - ChronoDuration::minutes(k);
        ring.nearest(target, self.lookup_tolerance).copied()
    }

    /// All points currently held for `symbol`, oldest first — used by the
    /// detector's momentum/acceleration checks which need more than one
    /// fixed horizon.
    pub fn points(&self, symbol: &str) -> Vec<SnapshotPoint> {
        self.rings.read().get(symbol).map(|r| r.points.clone()).unwrap_or_default()
    }

    pub fn clear(&self, symbol: &str) {
        self.rings.write().remove(symbol);
    }

    /// Average volume traded per `bucket_minutes`-minute window so far
    /// today, extrapolated from the cumulative `volume` delta across the
    /// whole ring. `None` until at least two points with distinct
    /// timestamps have been collected for this symbol today.
    fn avg_volume_per_bucket(&self, symbol: &str, bucket_minutes: f64) -> Option<f64> {
        let rings = self.rings.read();
        let ring = rings.get(symbol)?;
        let first = ring.points.first()?;
        let last = ring.points.last()?;
        let elapsed_minutes = (last.cached_at - first.cached_at).num_seconds() as f64 / 60.0;
        if elapsed_minutes <= 0.0 {
            return None;
        }
        let volume_delta = last.volume - first.volume;
        Some((volume_delta / elapsed_minutes) * bucket_minutes)
    }

    /// Baseline for P1's `volume_5m / avg_volume_per_5m` spike ratio.
    pub fn avg_volume_per_5m(&self, symbol: &str) -> f64 {
        self.avg_volume_per_bucket(symbol, 5.0).unwrap_or(0.0)
    }

    /// Baseline for the 1-minute variant's per-minute volume filter.
    pub fn avg_volume_per_1m(&self, symbol: &str) -> f64 {
        self.avg_volume_per_bucket(symbol, 1.0).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    fn store() -> SnapshotStore {
        SnapshotStore::new(Calendar::from_config(&MonitorConfig::default()))
    }

    fn point(minute: i64, price: f64) -> SnapshotPoint {
        let base = Utc::now().with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        SnapshotPoint {
            cached_at: (base + ChronoDuration::minutes(minute)).with_timezone(&Utc),
            price,
            volume: 1000.0,
            open_interest: None,
        }
    }

    #[test]
    fn append_then_latest() {
        let store = store();
        store.append("RELIANCE", point(0, 100.0));
        store.append("RELIANCE", point(1, 101.0));
        assert_eq!(store.latest("RELIANCE").unwrap().price, 101.0);
    }

    #[test]
    fn append_is_idempotent_on_non_advancing_tick() {
        let store = store();
        store.append("A", point(5, 100.0));
        store.append("A", point(5, 999.0)); // same cached_at, should be ignored
        assert_eq!(store.points("A").len(), 1);
        assert_eq!(store.latest("A").unwrap().price, 100.0);
    }

    #[test]
    fn price_at_k_returns_closest_within_tolerance() {
        let store = store();
        for m in 0..=10 {
            store.append("A", point(m, m as f64));
        }
        // latest is minute 10; price_at(5) should be the point at minute 5.
        assert_eq!(store.price_at("A", 5), Some(5.0));
    }

    #[test]
    fn price_at_k_returns_none_outside_tolerance() {
        let store = store();
        store.append("A", point(0, 1.0));
        store.append("A", point(20, 2.0));
        // latest is minute 20; price_at(10) wants minute 10, nearest is 8
        // minutes away (minute 0) and 10 away (none closer) -> no match.
        assert_eq!(store.price_at("A", 10), None);
    }

    #[test]
    fn ring_caps_at_capacity() {
        let store = store();
        for m in 0..100 {
            store.append("A", point(m, m as f64));
        }
        assert!(store.points("A").len() <= RING_CAPACITY);
    }

    #[test]
    fn clear_empties_ring() {
        let store = store();
        store.append("A", point(0, 1.0));
        store.clear("A");
        assert!(store.latest("A").is_none());
    }

    fn point_with_volume(minute: i64, volume: f64) -> SnapshotPoint {
        let base = Utc::now().with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        SnapshotPoint {
            cached_at: (base + ChronoDuration::minutes(minute)).with_timezone(&Utc),
            price: 100.0,
            volume,
            open_interest: None,
        }
    }

    #[test]
    fn avg_volume_extrapolates_from_cumulative_delta() {
        let store = store();
        store.append("A", point_with_volume(0, 1_000.0));
        store.append("A", point_with_volume(10, 11_000.0)); // 1,000/min over 10 minutes
        assert_eq!(store.avg_volume_per_1m("A"), 1_000.0);
        assert_eq!(store.avg_volume_per_5m("A"), 5_000.0);
    }

    #[test]
    fn avg_volume_is_zero_with_a_single_point() {
        let store = store();
        store.append("A", point_with_volume(0, 1_000.0));
        assert_eq!(store.avg_volume_per_5m("A"), 0.0);
        assert_eq!(store.avg_volume_per_1m("A"), 0.0);
    }
}
