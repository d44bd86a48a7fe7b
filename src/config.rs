// =============================================================================
// Monitor Configuration — closed, validated config struct
// =============================================================================
//
// Every tunable named in spec.md §6 lives here as a field with a
// `#[serde(default = "...")]`, so a partial or empty JSON config loads with
// documented defaults (same pattern as the teacher's `RuntimeConfig`).
// `deny_unknown_fields` rejects typos and stale keys at startup, per the
// §9 design note: "re-express as a closed, validated config struct... unknown
// keys rejected at startup."
//
// Persistence uses the same atomic tmp + rename pattern as the teacher, so a
// crash mid-write cannot corrupt the file used on the next restart.
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

fn default_th_1m() -> f64 {
    0.5
}
fn default_th_5m() -> f64 {
    1.25
}
fn default_th_10m() -> f64 {
    2.0
}
fn default_th_30m() -> f64 {
    3.0
}
fn default_spike_price_threshold() -> f64 {
    1.2
}
fn default_spike_vol_multiple() -> f64 {
    2.5
}
fn default_vol_mult_1m() -> f64 {
    5.0
}
fn default_min_price() -> f64 {
    10.0
}
fn default_min_adv() -> f64 {
    100_000.0
}
fn default_accel_factor() -> f64 {
    1.2
}

fn default_collector_tick_secs() -> u64 {
    60
}
fn default_monitor_1m_tick_secs() -> u64 {
    60
}
fn default_monitor_5m_tick_secs() -> u64 {
    300
}
fn default_volatility_scan_tick_secs() -> u64 {
    900
}
fn default_enrichment_tick_secs() -> u64 {
    60
}

fn default_cooldown_1m_mins() -> i64 {
    10
}
fn default_cooldown_5m_mins() -> i64 {
    10
}
fn default_cooldown_10m_mins() -> i64 {
    0
}
fn default_cooldown_volume_spike_mins() -> i64 {
    15
}
fn default_cooldown_30m_mins() -> i64 {
    30
}

fn default_sqlite_timeout_secs() -> u64 {
    30
}
fn default_sqlite_max_retries() -> u32 {
    3
}
fn default_sqlite_retry_base_secs() -> u64 {
    1
}
fn default_quote_max_age_hours() -> i64 {
    24
}
fn default_history_default_ttl_hours() -> i64 {
    24
}
fn default_history_vix_ttl_hours() -> i64 {
    24 * 7
}
fn default_history_row_cap() -> usize {
    10_000
}
fn default_eviction_weekday() -> u32 {
    6 // Sunday
}

fn default_max_req_per_sec() -> f64 {
    3.0
}
fn default_batch_size() -> usize {
    50
}
fn default_http_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}

fn default_market_open() -> String {
    "09:15".to_string()
}
fn default_market_close() -> String {
    "15:30".to_string()
}
fn default_timezone_offset_mins() -> i32 {
    5 * 60 + 30 // IST, UTC+5:30
}

fn default_oi_minimal_pct() -> f64 {
    1.0
}
fn default_oi_significant_pct() -> f64 {
    5.0
}
fn default_oi_strong_pct() -> f64 {
    10.0
}

fn default_iv_rank_floor() -> f64 {
    15.0
}
fn default_rv_iv_cap() -> f64 {
    1.2
}
fn default_range_cap() -> f64 {
    1.5
}
fn default_max_layers() -> u32 {
    3
}
fn default_add_min_interval_mins() -> i64 {
    30
}
fn default_add_min_score_gain() -> f64 {
    10.0
}

fn default_max_slot_retries() -> u32 {
    5
}

/// All recognized configuration options from spec.md §6, as a single closed
/// struct. Unknown keys are rejected at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MonitorConfig {
    // --- Thresholds ---------------------------------------------------
    pub th_1m: f64,
    pub th_5m: f64,
    pub th_10m: f64,
    pub th_30m: f64,
    pub spike_price_threshold: f64,
    pub spike_vol_multiple: f64,
    pub vol_mult_1m: f64,
    pub min_price: f64,
    pub min_adv: f64,
    /// 1-minute momentum acceleration constant (§9 open question, made
    /// configurable rather than hardcoded).
    pub accel_factor: f64,

    // --- Cadences (seconds) --------------------------------------------
    pub collector_tick_secs: u64,
    pub monitor_1m_tick_secs: u64,
    pub monitor_5m_tick_secs: u64,
    pub volatility_scan_tick_secs: u64,
    pub enrichment_tick_secs: u64,

    // --- Cooldowns (minutes) --------------------------------------------
    pub cooldown_1m_mins: i64,
    pub cooldown_5m_mins: i64,
    pub cooldown_10m_mins: i64,
    pub cooldown_volume_spike_mins: i64,
    pub cooldown_30m_mins: i64,

    // --- Cache -----------------------------------------------------------
    pub sqlite_timeout_secs: u64,
    pub sqlite_max_retries: u32,
    pub sqlite_retry_base_secs: u64,
    pub quote_max_age_hours: i64,
    pub history_default_ttl_hours: i64,
    pub history_vix_ttl_hours: i64,
    pub history_row_cap: usize,
    /// `chrono::Weekday::num_days_from_monday()` value on which the
    /// eviction job also compacts the store.
    pub eviction_weekday: u32,

    // --- Provider ----------------------------------------------------------
    pub max_req_per_sec: f64,
    pub batch_size: usize,
    pub http_timeout_secs: u64,
    pub max_retries: u32,

    // --- Market hours --------------------------------------------------
    pub market_open: String,
    pub market_close: String,
    pub timezone_offset_mins: i32,

    // --- OI strength bands -----------------------------------------------
    pub oi_minimal_pct: f64,
    pub oi_significant_pct: f64,
    pub oi_strong_pct: f64,

    // --- Option evaluator --------------------------------------------------
    pub iv_rank_floor: f64,
    pub rv_iv_cap: f64,
    pub range_cap: f64,
    pub max_layers: u32,
    pub add_min_interval_mins: i64,
    pub add_min_score_gain: f64,

    // --- Enrichment ------------------------------------------------------
    pub max_slot_retries: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            th_1m: default_th_1m(),
            th_5m: default_th_5m(),
            th_10m: default_th_10m(),
            th_30m: default_th_30m(),
            spike_price_threshold: default_spike_price_threshold(),
            spike_vol_multiple: default_spike_vol_multiple(),
            vol_mult_1m: default_vol_mult_1m(),
            min_price: default_min_price(),
            min_adv: default_min_adv(),
            accel_factor: default_accel_factor(),

            collector_tick_secs: default_collector_tick_secs(),
            monitor_1m_tick_secs: default_monitor_1m_tick_secs(),
            monitor_5m_tick_secs: default_monitor_5m_tick_secs(),
            volatility_scan_tick_secs: default_volatility_scan_tick_secs(),
            enrichment_tick_secs: default_enrichment_tick_secs(),

            cooldown_1m_mins: default_cooldown_1m_mins(),
            cooldown_5m_mins: default_cooldown_5m_mins(),
            cooldown_10m_mins: default_cooldown_10m_mins(),
            cooldown_volume_spike_mins: default_cooldown_volume_spike_mins(),
            cooldown_30m_mins: default_cooldown_30m_mins(),

            sqlite_timeout_secs: default_sqlite_timeout_secs(),
            sqlite_max_retries: default_sqlite_max_retries(),
            sqlite_retry_base_secs: default_sqlite_retry_base_secs(),
            quote_max_age_hours: default_quote_max_age_hours(),
            history_default_ttl_hours: default_history_default_ttl_hours(),
            history_vix_ttl_hours: default_history_vix_ttl_hours(),
            history_row_cap: default_history_row_cap(),
            eviction_weekday: default_eviction_weekday(),

            max_req_per_sec: default_max_req_per_sec(),
            batch_size: default_batch_size(),
            http_timeout_secs: default_http_timeout_secs(),
            max_retries: default_max_retries(),

            market_open: default_market_open(),
            market_close: default_market_close(),
            timezone_offset_mins: default_timezone_offset_mins(),

            oi_minimal_pct: default_oi_minimal_pct(),
            oi_significant_pct: default_oi_significant_pct(),
            oi_strong_pct: default_oi_strong_pct(),

            iv_rank_floor: default_iv_rank_floor(),
            rv_iv_cap: default_rv_iv_cap(),
            range_cap: default_range_cap(),
            max_layers: default_max_layers(),
            add_min_interval_mins: default_add_min_interval_mins(),
            add_min_score_gain: default_add_min_score_gain(),

            max_slot_retries: default_max_slot_retries(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Persist the current configuration using an atomic write (write to
    /// `.tmp`, then rename), preventing corruption on crash mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Reject structurally nonsensical values a typo could produce (negative
    /// thresholds, zero cadences) even though `deny_unknown_fields` already
    /// rejects unknown keys at the serde layer.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("th_1m", self.th_1m),
            ("th_5m", self.th_5m),
            ("th_10m", self.th_10m),
            ("th_30m", self.th_30m),
            ("spike_price_threshold", self.spike_price_threshold),
            ("spike_vol_multiple", self.spike_vol_multiple),
            ("vol_mult_1m", self.vol_mult_1m),
            ("accel_factor", self.accel_factor),
            ("max_req_per_sec", self.max_req_per_sec),
        ];
        for (name, value) in positive {
            if value <= 0.0 {
                return Err(MonitorError::InvalidArgument(format!(
                    "{name} must be > 0, got {value}"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(MonitorError::InvalidArgument(
                "batch_size must be > 0".into(),
            ));
        }
        if self.oi_minimal_pct >= self.oi_significant_pct
            || self.oi_significant_pct >= self.oi_strong_pct
        {
            return Err(MonitorError::InvalidArgument(
                "OI strength bands must be strictly increasing".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.th_5m, 1.25);
        assert_eq!(cfg.spike_vol_multiple, 2.5);
        assert_eq!(cfg.cooldown_volume_spike_mins, 15);
        assert_eq!(cfg.cooldown_30m_mins, 30);
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.max_req_per_sec, 3.0);
        assert_eq!(cfg.iv_rank_floor, 15.0);
        cfg.validate().expect("defaults must validate");
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: MonitorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.th_5m, 1.25);
    }

    #[test]
    fn unknown_key_rejected() {
        let err = serde_json::from_str::<MonitorConfig>(r#"{"not_a_real_field": 1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn validate_rejects_nonsense() {
        let mut cfg = MonitorConfig::default();
        cfg.th_5m = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = MonitorConfig::default();
        cfg.save(&path).unwrap();
        let loaded = MonitorConfig::load(&path).unwrap();
        assert_eq!(cfg.th_5m, loaded.th_5m);
        assert_eq!(cfg.batch_size, loaded.batch_size);
    }
}
