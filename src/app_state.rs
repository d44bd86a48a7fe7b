// =============================================================================
// Central Application State — composition root
// =============================================================================
//
// Ties every monitoring subsystem together behind `Arc` handles so each
// background task can hold its own reference without holding a lock on the
// whole state. Mirrors the version-counter pattern used for change
// detection, but here the counter marks config reloads rather than a
// dashboard feed.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cache::{HistoryCache, QuoteCache};
use crate::calendar::Calendar;
use crate::config::MonitorConfig;
use crate::cooldown::CooldownManager;
use crate::enrichment::EnrichmentStore;
use crate::error::Result;
use crate::model::EnrichmentRecord;
use crate::oi::OiBaselineStore;
use crate::snapshot::SnapshotStore;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing counter, bumped on every config reload.
    pub config_version: AtomicU64,
    pub config: Arc<MonitorConfig>,

    pub calendar: Arc<Calendar>,
    pub quote_cache: Arc<QuoteCache>,
    pub history_cache: Arc<HistoryCache>,
    pub snapshots: Arc<SnapshotStore>,
    pub oi_baselines: Arc<OiBaselineStore>,
    pub cooldowns: Arc<CooldownManager>,
    pub enrichment: Arc<EnrichmentStore>,

    /// Sender half handed to the alert fanout; the enrichment worker drains
    /// the matching receiver on each of its own ticks.
    pub enrichment_tx: mpsc::UnboundedSender<EnrichmentRecord>,

    pub start_time: std::time::Instant,
}

/// Paths to the durable files/databases a running instance persists to.
pub struct StoragePaths {
    pub quote_cache_path: std::path::PathBuf,
    pub history_cache_path: std::path::PathBuf,
    pub oi_baseline_path: std::path::PathBuf,
    pub cooldown_path: std::path::PathBuf,
}

impl AppState {
    /// Build the composition root from config and durable storage paths.
    /// The enrichment queue's receiver half is handed straight to the
    /// `EnrichmentStore` it builds, so the worker drains it via `self`.
    pub fn new(config: MonitorConfig, paths: &StoragePaths) -> Result<Self> {
        let config = Arc::new(config);
        let calendar = Arc::new(Calendar::from_config(&config));
        let quote_cache = Arc::new(QuoteCache::open(&paths.quote_cache_path, &config)?);
        let history_cache = Arc::new(HistoryCache::open(&paths.history_cache_path, &config)?);
        let snapshots = Arc::new(SnapshotStore::new((*calendar).clone()));
        let oi_baselines = Arc::new(OiBaselineStore::open(&paths.oi_baseline_path, &config)?);
        let cooldowns = Arc::new(CooldownManager::open(&paths.cooldown_path)?);
        let (enrichment_tx, enrichment_rx) = mpsc::unbounded_channel();
        let enrichment = Arc::new(EnrichmentStore::new(&config, enrichment_rx));

        Ok(Self {
            config_version: AtomicU64::new(1),
            config,
            calendar,
            quote_cache,
            history_cache,
            snapshots,
            oi_baselines,
            cooldowns,
            enrichment,
            enrichment_tx,
            start_time: std::time::Instant::now(),
        })
    }

    pub fn bump_config_version(&self) -> u64 {
        self.config_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}
