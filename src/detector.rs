// =============================================================================
// Alert Detector (C8) — the core change-detection logic
// =============================================================================
//
// A pure function of a snapshot ring, config, and an optional OI analysis:
// given the same inputs it always yields the same candidate alerts. No I/O,
// no locks — everything it needs is passed in by the caller.

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::model::{Alert, AlertKind, Direction, Horizon, OiAnalysis, SnapshotPoint};

/// Everything the detector needs about one instrument at one tick.
pub struct DetectorInput<'a> {
    pub symbol: &'a str,
    pub now: DateTime<Utc>,
    pub ring: &'a [SnapshotPoint], // oldest first, as returned by SnapshotStore::points
    pub avg_volume_per_5m: f64,
    pub avg_volume_per_1m: f64,
    pub avg_daily_volume: f64,
    pub oi_snapshot: Option<OiAnalysis>,
}

fn pct_change(current: f64, reference: f64) -> Option<f64> {
    if reference == 0.0 {
        return None;
    }
    Some((current - reference) / reference * 100.0)
}

fn nearest(ring: &[SnapshotPoint], target: DateTime<Utc>, tolerance_secs: i64) -> Option<&SnapshotPoint> {
    ring.iter()
        .map(|p| (p, (p.cached_at - target).num_seconds().abs()))
        .filter(|(_, diff)| *diff <= tolerance_secs)
        .min_by_key(|(_, diff)| *diff)
        .map(|(p, _)| p)
}

fn price_k_minutes_ago(ring: &[SnapshotPoint], latest: &SnapshotPoint, k: i64) -> Option<f64> {
    nearest(ring, latest.cached_at - chrono::Duration::minutes(k), 60).map(|p| p.price)
}

fn volume_k_minutes_ago(ring: &[SnapshotPoint], latest: &SnapshotPoint, k: i64) -> Option<f64> {
    nearest(ring, latest.cached_at - chrono::Duration::minutes(k), 60).map(|p| p.volume)
}

/// Per-minute drop rate over the last `window` minutes ending at `latest`,
/// i.e. `(price_{now-window} - price_now) / window`. Positive means
/// falling. `None` if the ring lacks a point at that horizon.
fn per_minute_drop_rate(ring: &[SnapshotPoint], latest: &SnapshotPoint, window: i64) -> Option<f64> {
    let past = price_k_minutes_ago(ring, latest, window)?;
    Some((past - latest.price) / window as f64)
}

/// True if the rate of decline in the last minute accelerated beyond
/// `accel_factor` times the average rate over the preceding 4 minutes
/// (the shared momentum test used by P2 and the 1-minute variant).
fn momentum_accelerating(ring: &[SnapshotPoint], latest: &SnapshotPoint, accel_factor: f64) -> bool {
    let Some(last_1m) = per_minute_drop_rate(ring, latest, 1) else { return false };
    let Some(prior_4m) = per_minute_drop_rate(ring, latest, 5).map(|total_5m_rate| {
        // rate over the 4 minutes preceding the last 1: (total over 5m * 5 - last 1m move) / 4
        let total_5m_move = total_5m_rate * 5.0;
        let last_1m_move = last_1m;
        (total_5m_move - last_1m_move) / 4.0
    }) else {
        return false;
    };
    if prior_4m <= 0.0 {
        return false;
    }
    last_1m > accel_factor * prior_4m
}

/// Candidate alerts for one instrument at one tick, evaluated in priority
/// order P1..P4, with the 1-minute variant gated separately by the caller
/// (it runs on its own cadence).
pub fn detect_5m_cadence(input: &DetectorInput, cfg: &MonitorConfig) -> Vec<Alert> {
    let Some(latest) = input.ring.last() else { return Vec::new() };
    let mut alerts = Vec::new();

    // P1: volume spike (highest priority).
    if let (Some(ref5), Some(vol_5m)) = (
        price_k_minutes_ago(input.ring, latest, 5),
        volume_k_minutes_ago(input.ring, latest, 5),
    ) {
        if let Some(delta_5m) = pct_change(latest.price, ref5) {
            let vol_delta = latest.volume - vol_5m;
            if delta_5m.abs() >= cfg.spike_price_threshold
                && input.avg_volume_per_5m > 0.0
                && vol_delta / input.avg_volume_per_5m >= cfg.spike_vol_multiple
            {
                alerts.push(build_alert(
                    input,
                    latest,
                    if delta_5m < 0.0 { AlertKind::VolumeSpikeDrop } else { AlertKind::VolumeSpikeRise },
                    delta_5m.abs(),
                    Horizon::VolumeSpike,
                    ref5,
                    Some(vol_delta / input.avg_volume_per_5m),
                ));
            }
        }
    }

    // P2: 5-minute move, drops additionally gated on momentum acceleration.
    if let Some(ref5) = price_k_minutes_ago(input.ring, latest, 5) {
        if let Some(delta_5m) = pct_change(latest.price, ref5) {
            let eligible = if delta_5m < 0.0 {
                delta_5m.abs() >= cfg.th_5m && momentum_accelerating(input.ring, latest, cfg.accel_factor)
            } else {
                delta_5m.abs() >= cfg.th_5m
            };
            if eligible {
                alerts.push(build_alert(
                    input,
                    latest,
                    if delta_5m < 0.0 { AlertKind::M5Drop } else { AlertKind::M5Rise },
                    delta_5m.abs(),
                    Horizon::M5,
                    ref5,
                    None,
                ));
            }
        }
    }

    // P3: 10-minute move, no momentum gate.
    if let Some(ref10) = price_k_minutes_ago(input.ring, latest, 10) {
        if let Some(delta_10m) = pct_change(latest.price, ref10) {
            if delta_10m.abs() >= cfg.th_10m {
                alerts.push(build_alert(
                    input,
                    latest,
                    if delta_10m < 0.0 { AlertKind::M10Drop } else { AlertKind::M10Rise },
                    delta_10m.abs(),
                    Horizon::M10,
                    ref10,
                    None,
                ));
            }
        }
    }

    // P4: 30-minute move.
    if let Some(ref30) = price_k_minutes_ago(input.ring, latest, 30) {
        if let Some(delta_30m) = pct_change(latest.price, ref30) {
            if delta_30m.abs() >= cfg.th_30m {
                alerts.push(build_alert(
                    input,
                    latest,
                    if delta_30m < 0.0 { AlertKind::M30Drop } else { AlertKind::M30Rise },
                    delta_30m.abs(),
                    Horizon::M30,
                    ref30,
                    None,
                ));
            }
        }
    }

    attach_oi(&mut alerts, input.oi_snapshot.clone());
    alerts
}

/// The 1-minute monitor variant (spec.md §4.6): 6 additive filters, all must
/// pass. Runs on its own cadence against the same ring.
pub fn detect_1m_cadence(input: &DetectorInput, cfg: &MonitorConfig, in_cooldown: bool) -> Vec<Alert> {
    let Some(latest) = input.ring.last() else { return Vec::new() };
    let Some(ref1) = price_k_minutes_ago(input.ring, latest, 1) else { return Vec::new() };
    let Some(delta_1m) = pct_change(latest.price, ref1) else { return Vec::new() };

    let filters = [
        delta_1m.abs() >= cfg.th_1m,
        volume_k_minutes_ago(input.ring, latest, 1)
            .map(|v1| input.avg_volume_per_1m > 0.0 && (latest.volume - v1) / input.avg_volume_per_1m >= cfg.vol_mult_1m)
            .unwrap_or(false),
        latest.price >= cfg.min_price,
        input.avg_daily_volume >= cfg.min_adv,
        !in_cooldown,
        delta_1m >= 0.0 || momentum_accelerating(input.ring, latest, cfg.accel_factor),
    ];

    if !filters.iter().all(|ok| *ok) {
        return Vec::new();
    }

    let mut alerts = vec![build_alert(
        input,
        latest,
        if delta_1m < 0.0 { AlertKind::M1Drop } else { AlertKind::M1Rise },
        delta_1m.abs(),
        Horizon::M1,
        ref1,
        None,
    )];
    attach_oi(&mut alerts, input.oi_snapshot.clone());
    alerts
}

fn attach_oi(alerts: &mut [Alert], oi: Option<OiAnalysis>) {
    if oi.is_none() {
        return;
    }
    for alert in alerts.iter_mut() {
        alert.oi_snapshot = oi.clone();
    }
}

fn build_alert(
    input: &DetectorInput,
    latest: &SnapshotPoint,
    kind: AlertKind,
    magnitude_pct: f64,
    horizon: Horizon,
    reference_price: f64,
    volume_multiple: Option<f64>,
) -> Alert {
    Alert {
        instrument: input.symbol.to_string(),
        kind,
        direction: if matches!(
            kind,
            AlertKind::M1Drop
                | AlertKind::M5Drop
                | AlertKind::M10Drop
                | AlertKind::M30Drop
                | AlertKind::VolumeSpikeDrop
        ) {
            Direction::Down
        } else {
            Direction::Up
        },
        magnitude_pct,
        horizon,
        reference_price,
        current_price: latest.price,
        volume_multiple,
        oi_snapshot: None,
        timestamp: input.now,
        row_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pt(minute: i64, price: f64, volume: f64) -> SnapshotPoint {
        SnapshotPoint {
            cached_at: Utc::now() - Duration::minutes(30 - minute),
            price,
            volume,
            open_interest: None,
        }
    }

    #[test]
    fn no_alerts_when_price_flat() {
        let ring: Vec<_> = (0..=30).map(|m| pt(m, 100.0, 1000.0)).collect();
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: None,
        };
        let cfg = MonitorConfig::default();
        assert!(detect_5m_cadence(&input, &cfg).is_empty());
    }

    #[test]
    fn ten_minute_move_fires_without_momentum_gate() {
        let mut ring: Vec<_> = (0..=30).map(|m| pt(m, 100.0, 1000.0)).collect();
        // latest point (minute 30) is 3% below the minute-20 reference.
        let idx = ring.len() - 1;
        ring[idx].price = 97.0;
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: None,
        };
        let cfg = MonitorConfig::default();
        let alerts = detect_5m_cadence(&input, &cfg);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::M10Drop));
    }

    #[test]
    fn at_most_one_alert_per_horizon_per_tick() {
        let mut ring: Vec<_> = (0..=30).map(|m| pt(m, 100.0, 1000.0)).collect();
        let idx = ring.len() - 1;
        ring[idx].price = 90.0; // big drop, trips multiple horizons
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: None,
        };
        let cfg = MonitorConfig::default();
        let alerts = detect_5m_cadence(&input, &cfg);
        let horizon_30m_count = alerts.iter().filter(|a| a.horizon == Horizon::M30).count();
        assert!(horizon_30m_count <= 1);
    }

    #[test]
    fn oi_snapshot_is_attached_to_every_alert_not_emitted_alone() {
        let mut ring: Vec<_> = (0..=30).map(|m| pt(m, 100.0, 1000.0)).collect();
        let idx = ring.len() - 1;
        ring[idx].price = 90.0;
        let oi = OiAnalysis {
            pattern: crate::model::OiPattern::ShortBuildup,
            oi_change_pct: 6.0,
            strength: crate::model::OiStrength::Strong,
            priority: crate::model::OiPriority::High,
        };
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: Some(oi),
        };
        let cfg = MonitorConfig::default();
        let alerts = detect_5m_cadence(&input, &cfg);
        assert!(!alerts.is_empty());
        assert!(alerts.iter().all(|a| a.oi_snapshot.is_some()));
    }

    #[test]
    fn one_minute_variant_fires_on_drop_with_accelerating_momentum() {
        let mut ring: Vec<_> = (0..=5).map(|m| pt(m, 100.0, 200.0)).collect();
        ring[0].price = 103.0;
        ring[1].price = 102.5;
        ring[2].price = 102.0;
        ring[3].price = 101.5;
        ring[4].price = 101.0;
        ring[5].price = 99.0; // sharp last-minute drop vs a gentle prior decline
        ring[5].volume = 2000.0;
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: None,
        };
        let cfg = MonitorConfig::default();
        let alerts = detect_1m_cadence(&input, &cfg, false);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::M1Drop);
    }

    #[test]
    fn one_minute_variant_fires_on_rise_without_momentum_gate() {
        let mut ring: Vec<_> = (0..=5).map(|m| pt(m, 100.0, 200.0)).collect();
        let idx = ring.len() - 1;
        ring[idx].price = 102.0; // sudden, non-accelerating rise
        ring[idx].volume = 2000.0;
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: None,
        };
        let cfg = MonitorConfig::default();
        // momentum_accelerating would be false here; rises must not be
        // gated on it the way drops are.
        let alerts = detect_1m_cadence(&input, &cfg, false);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::M1Rise);
    }

    #[test]
    fn one_minute_variant_blocked_by_cooldown() {
        let ring: Vec<_> = (0..=5).map(|m| pt(m, 100.0, 200.0)).collect();
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: None,
        };
        let cfg = MonitorConfig::default();
        assert!(detect_1m_cadence(&input, &cfg, true).is_empty());
    }

    #[test]
    fn empty_ring_yields_no_alerts() {
        let ring: Vec<SnapshotPoint> = Vec::new();
        let input = DetectorInput {
            symbol: "A",
            now: Utc::now(),
            ring: &ring,
            avg_volume_per_5m: 1000.0,
            avg_volume_per_1m: 200.0,
            avg_daily_volume: 1_000_000.0,
            oi_snapshot: None,
        };
        let cfg = MonitorConfig::default();
        assert!(detect_5m_cadence(&input, &cfg).is_empty());
        assert!(detect_1m_cadence(&input, &cfg, false).is_empty());
    }
}
