// =============================================================================
// OI Pattern Engine (C7) — F&O open-interest co-movement classification
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::model::{OiAnalysis, OiPattern, OiPriority, OiStrength};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Baseline {
    day: NaiveDate,
    day_start_oi: f64,
    day_start_price: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BaselineFile {
    baselines: HashMap<String, Baseline>,
}

/// Day-start OI/price baselines per F&O instrument, persisted across
/// restarts so a mid-day crash does not lose the reference point.
pub struct OiBaselineStore {
    path: Option<PathBuf>,
    inner: RwLock<BaselineFile>,
    minimal_pct: f64,
    significant_pct: f64,
    strong_pct: f64,
}

impl OiBaselineStore {
    pub fn new(cfg: &MonitorConfig) -> Self {
        Self {
            path: None,
            inner: RwLock::new(BaselineFile::default()),
            minimal_pct: cfg.oi_minimal_pct,
            significant_pct: cfg.oi_significant_pct,
            strong_pct: cfg.oi_strong_pct,
        }
    }

    /// Load (or start fresh if absent) a baseline file backed by `path`.
    pub fn open(path: impl AsRef<Path>, cfg: &MonitorConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BaselineFile::default()
        };
        Ok(Self {
            path: Some(path),
            inner: RwLock::new(inner),
            minimal_pct: cfg.oi_minimal_pct,
            significant_pct: cfg.oi_significant_pct,
            strong_pct: cfg.oi_strong_pct,
        })
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let content = serde_json::to_string_pretty(&*self.inner.read())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Record the day's baseline for `symbol` the first time a valid OI
    /// reading for a new calendar day arrives. No-op if already recorded
    /// for that day.
    pub fn record_if_new_day(&self, symbol: &str, day: NaiveDate, oi: f64, price: f64) -> Result<()> {
        {
            let inner = self.inner.read();
            if let Some(existing) = inner.baselines.get(symbol) {
                if existing.day == day {
                    return Ok(());
                }
            }
        }
        {
            let mut inner = self.inner.write();
            inner.baselines.insert(
                symbol.to_string(),
                Baseline { day, day_start_oi: oi, day_start_price: price },
            );
        }
        self.persist()
    }

    fn classify(price_change_pct: f64, oi_change_pct: f64) -> OiPattern {
        match (price_change_pct > 0.0, oi_change_pct > 0.0) {
            (true, true) => OiPattern::LongBuildup,
            (false, true) => OiPattern::ShortBuildup,
            (true, false) => OiPattern::ShortCovering,
            (false, false) => OiPattern::LongUnwinding,
        }
    }

    fn strength(&self, abs_oi_change_pct: f64) -> OiStrength {
        if abs_oi_change_pct >= self.strong_pct {
            OiStrength::VeryStrong
        } else if abs_oi_change_pct >= self.significant_pct {
            OiStrength::Strong
        } else if abs_oi_change_pct >= self.minimal_pct {
            OiStrength::Significant
        } else {
            OiStrength::Minimal
        }
    }

    fn priority(strength: OiStrength) -> OiPriority {
        match strength {
            OiStrength::Minimal => OiPriority::Low,
            OiStrength::Significant => OiPriority::Low,
            OiStrength::Strong => OiPriority::High,
            OiStrength::VeryStrong => OiPriority::High,
        }
    }

    /// Analyze the current OI/price reading against the recorded baseline
    /// for `symbol`. Returns `None` if no baseline has been recorded yet
    /// (e.g. no valid OI seen today).
    pub fn analyze(&self, symbol: &str, current_oi: f64, current_price: f64) -> Option<OiAnalysis> {
        let inner = self.inner.read();
        let baseline = inner.baselines.get(symbol)?;
        if baseline.day_start_oi == 0.0 || baseline.day_start_price == 0.0 {
            return None;
        }
        let oi_change_pct = (current_oi - baseline.day_start_oi) / baseline.day_start_oi * 100.0;
        let price_change_pct = (current_price - baseline.day_start_price) / baseline.day_start_price * 100.0;
        let pattern = Self::classify(price_change_pct, oi_change_pct);
        let strength = self.strength(oi_change_pct.abs());
        let priority = Self::priority(strength);
        Some(OiAnalysis { pattern, oi_change_pct, strength, priority })
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OiBaselineStore {
        OiBaselineStore::new(&MonitorConfig::default())
    }

    #[test]
    fn no_baseline_yields_none() {
        let store = store();
        assert!(store.analyze("NIFTY25JUNFUT", 1000.0, 100.0).is_none());
    }

    #[test]
    fn second_record_same_day_does_not_overwrite() {
        let store = store();
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        store.record_if_new_day("A", day, 1000.0, 100.0).unwrap();
        store.record_if_new_day("A", day, 5000.0, 500.0).unwrap(); // same day, ignored

        let analysis = store.analyze("A", 1100.0, 110.0).unwrap();
        // oi_change_pct computed against the *original* baseline (1000), not 5000.
        assert!((analysis.oi_change_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn new_day_resets_baseline() {
        let store = store();
        let day1 = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 6, 2).unwrap();
        store.record_if_new_day("A", day1, 1000.0, 100.0).unwrap();
        store.record_if_new_day("A", day2, 2000.0, 200.0).unwrap();

        let analysis = store.analyze("A", 2200.0, 220.0).unwrap();
        assert!((analysis.oi_change_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn classifies_long_buildup() {
        let store = store();
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        store.record_if_new_day("A", day, 1000.0, 100.0).unwrap();
        let analysis = store.analyze("A", 1200.0, 110.0).unwrap(); // price up, OI up
        assert_eq!(analysis.pattern, OiPattern::LongBuildup);
    }

    #[test]
    fn classifies_short_buildup() {
        let store = store();
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        store.record_if_new_day("A", day, 1000.0, 100.0).unwrap();
        let analysis = store.analyze("A", 1200.0, 90.0).unwrap(); // price down, OI up
        assert_eq!(analysis.pattern, OiPattern::ShortBuildup);
    }

    #[test]
    fn classifies_short_covering() {
        let store = store();
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        store.record_if_new_day("A", day, 1000.0, 100.0).unwrap();
        let analysis = store.analyze("A", 800.0, 110.0).unwrap(); // price up, OI down
        assert_eq!(analysis.pattern, OiPattern::ShortCovering);
    }

    #[test]
    fn classifies_long_unwinding() {
        let store = store();
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        store.record_if_new_day("A", day, 1000.0, 100.0).unwrap();
        let analysis = store.analyze("A", 800.0, 90.0).unwrap(); // price down, OI down
        assert_eq!(analysis.pattern, OiPattern::LongUnwinding);
    }

    #[test]
    fn strength_bands_and_priority() {
        let store = store(); // minimal=1.0, significant=5.0, strong=10.0
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        store.record_if_new_day("A", day, 1000.0, 100.0).unwrap();

        let weak = store.analyze("A", 1005.0, 101.0).unwrap(); // 0.5% -> Minimal
        assert_eq!(weak.strength, OiStrength::Minimal);
        assert_eq!(weak.priority, OiPriority::Low);

        let strong = store.analyze("A", 1120.0, 101.0).unwrap(); // 12% -> VeryStrong
        assert_eq!(strong.strength, OiStrength::VeryStrong);
        assert_eq!(strong.priority, OiPriority::High);
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let cfg = MonitorConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oi_baseline.json");
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();

        {
            let store = OiBaselineStore::open(&path, &cfg).unwrap();
            store.record_if_new_day("A", day, 1000.0, 100.0).unwrap();
        }

        let reloaded = OiBaselineStore::open(&path, &cfg).unwrap();
        let analysis = reloaded.analyze("A", 1100.0, 105.0).unwrap();
        assert!((analysis.oi_change_pct - 10.0).abs() < 1e-9);
    }
}
