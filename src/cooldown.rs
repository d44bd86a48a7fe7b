// =============================================================================
// Dedup / Cooldown Manager (C9)
// =============================================================================
//
// `history[(symbol, alert_kind)] = last_emitted_ts`, written through to disk
// on every update (same atomic tmp+rename persistence as config.rs and
// oi.rs) and reloaded at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::model::AlertKind;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CooldownFile {
    // Serde can't use tuple keys directly; store as "symbol|kind".
    history: HashMap<String, DateTime<Utc>>,
}

fn key(symbol: &str, kind: AlertKind) -> String {
    format!("{symbol}|{}", kind.wire_id())
}

fn cooldown_for(kind: AlertKind, cfg: &MonitorConfig) -> ChronoDuration {
    let mins = match kind {
        AlertKind::M1Drop | AlertKind::M1Rise => cfg.cooldown_1m_mins,
        AlertKind::M5Drop | AlertKind::M5Rise => cfg.cooldown_5m_mins,
        AlertKind::M10Drop | AlertKind::M10Rise => cfg.cooldown_10m_mins,
        AlertKind::M30Drop | AlertKind::M30Rise => cfg.cooldown_30m_mins,
        AlertKind::VolumeSpikeDrop | AlertKind::VolumeSpikeRise => cfg.cooldown_volume_spike_mins,
        AlertKind::OiLongBuildup
        | AlertKind::OiShortBuildup
        | AlertKind::OiShortCovering
        | AlertKind::OiLongUnwinding => 0,
    };
    ChronoDuration::minutes(mins)
}

/// Per-(symbol, alert kind) dedup gate. Operations are atomic per key: the
/// whole table sits behind a single mutex, but the critical section is a
/// map lookup plus an insert, never I/O.
pub struct CooldownManager {
    path: Option<PathBuf>,
    inner: Mutex<CooldownFile>,
}

impl CooldownManager {
    pub fn new() -> Self {
        Self { path: None, inner: Mutex::new(CooldownFile::default()) }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            CooldownFile::default()
        };
        Ok(Self { path: Some(path), inner: Mutex::new(inner) })
    }

    fn persist(&self, file: &CooldownFile) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let content = serde_json::to_string_pretty(file)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// `true` (and records `now`) if no prior entry exists or the cooldown
    /// for `kind` has elapsed; `false` otherwise.
    pub fn should_emit(&self, symbol: &str, kind: AlertKind, now: DateTime<Utc>, cfg: &MonitorConfig) -> Result<bool> {
        let k = key(symbol, kind);
        let cooldown = cooldown_for(kind, cfg);

        let mut inner = self.inner.lock();
        let eligible = match inner.history.get(&k) {
            Some(last) => now.signed_duration_since(*last) >= cooldown,
            None => true,
        };
        if !eligible {
            return Ok(false);
        }
        inner.history.insert(k, now);
        let snapshot = CooldownFile { history: inner.history.clone() };
        drop(inner);
        self.persist(&snapshot)?;
        Ok(true)
    }

    /// Startup policy: drop entries older than `cutoff` (e.g. the start of
    /// the current trading day).
    pub fn clear_older_than(&self, cutoff: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.history.retain(|_, ts| *ts >= cutoff);
        let snapshot = CooldownFile { history: inner.history.clone() };
        drop(inner);
        self.persist(&snapshot)
    }
}

impl Default for CooldownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emit_always_allowed() {
        let mgr = CooldownManager::new();
        let cfg = MonitorConfig::default();
        assert!(mgr.should_emit("A", AlertKind::M5Drop, Utc::now(), &cfg).unwrap());
    }

    #[test]
    fn second_emit_within_cooldown_is_blocked() {
        let mgr = CooldownManager::new();
        let cfg = MonitorConfig::default();
        let t0 = Utc::now();
        assert!(mgr.should_emit("A", AlertKind::M5Drop, t0, &cfg).unwrap());
        assert!(!mgr.should_emit("A", AlertKind::M5Drop, t0 + ChronoDuration::minutes(1), &cfg).unwrap());
    }

    #[test]
    fn emit_after_cooldown_elapses_is_allowed() {
        let mgr = CooldownManager::new();
        let cfg = MonitorConfig::default(); // cooldown_5m_mins = 10
        let t0 = Utc::now();
        assert!(mgr.should_emit("A", AlertKind::M5Drop, t0, &cfg).unwrap());
        assert!(mgr.should_emit("A", AlertKind::M5Drop, t0 + ChronoDuration::minutes(11), &cfg).unwrap());
    }

    #[test]
    fn different_kinds_are_independent() {
        let mgr = CooldownManager::new();
        let cfg = MonitorConfig::default();
        let t0 = Utc::now();
        assert!(mgr.should_emit("A", AlertKind::M5Drop, t0, &cfg).unwrap());
        assert!(mgr.should_emit("A", AlertKind::M10Drop, t0, &cfg).unwrap());
    }

    #[test]
    fn different_symbols_are_independent() {
        let mgr = CooldownManager::new();
        let cfg = MonitorConfig::default();
        let t0 = Utc::now();
        assert!(mgr.should_emit("A", AlertKind::M5Drop, t0, &cfg).unwrap());
        assert!(mgr.should_emit("B", AlertKind::M5Drop, t0, &cfg).unwrap());
    }

    #[test]
    fn zero_cooldown_kind_always_emits() {
        let mgr = CooldownManager::new();
        let cfg = MonitorConfig::default(); // cooldown_10m_mins = 0
        let t0 = Utc::now();
        assert!(mgr.should_emit("A", AlertKind::M10Drop, t0, &cfg).unwrap());
        assert!(mgr.should_emit("A", AlertKind::M10Drop, t0, &cfg).unwrap());
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cooldown.json");
        let cfg = MonitorConfig::default();
        let t0 = Utc::now();

        {
            let mgr = CooldownManager::open(&path).unwrap();
            assert!(mgr.should_emit("A", AlertKind::M5Drop, t0, &cfg).unwrap());
        }

        let reloaded = CooldownManager::open(&path).unwrap();
        assert!(!reloaded.should_emit("A", AlertKind::M5Drop, t0 + ChronoDuration::minutes(1), &cfg).unwrap());
    }

    #[test]
    fn clear_older_than_drops_stale_entries() {
        let mgr = CooldownManager::new();
        let cfg = MonitorConfig::default();
        let t0 = Utc::now();
        mgr.should_emit("A", AlertKind::M5Drop, t0, &cfg).unwrap();
        mgr.clear_older_than(t0 + ChronoDuration::minutes(1)).unwrap();
        // Entry should be gone, so emitting again immediately succeeds.
        assert!(mgr.should_emit("A", AlertKind::M5Drop, t0, &cfg).unwrap());
    }
}
