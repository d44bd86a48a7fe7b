// =============================================================================
// NSE Pulse — Main Entry Point
// =============================================================================
//
// Wires the monitoring substrate together: loads configuration, opens the
// durable caches, registers each monitor with the scheduler, and runs until
// a shutdown signal arrives.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nse_pulse::app_state::{AppState, StoragePaths};
use nse_pulse::calendar::Phase;
use nse_pulse::config::MonitorConfig;
use nse_pulse::detector::{detect_1m_cadence, detect_5m_cadence, DetectorInput};
use nse_pulse::error::Result;
use nse_pulse::model::{Candle, Instrument, InstrumentKind, IntervalKind, Quote};
use nse_pulse::provider::QuoteProvider;
use nse_pulse::scheduler::{MonitorSpec, Scheduler};
use nse_pulse::sinks::{AlertFanout, AlertLog, Notifier};

/// Placeholder quote provider. The real brokerage REST client is an
/// external collaborator; this stub exists so the binary links and runs
/// end-to-end against an empty universe until a real provider is wired in.
struct StubProvider;

impl QuoteProvider for StubProvider {
    async fn quote_batch(&self, _instruments: &[Instrument]) -> Result<HashMap<String, Quote>> {
        Ok(HashMap::new())
    }

    async fn historical(
        &self,
        _instrument: &Instrument,
        _interval: IntervalKind,
        _from: chrono::DateTime<Utc>,
        _to: chrono::DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn instrument_metadata(&self) -> Result<Vec<Instrument>> {
        Ok(Vec::new())
    }
}

/// Placeholder notifier/log pair. Chat delivery and spreadsheet rendering
/// are external collaborators; this stub only logs via `tracing` so the
/// fanout ordering can be exercised without a real sink.
struct LoggingNotifier;
impl Notifier for LoggingNotifier {
    async fn notify(&self, alert: &nse_pulse::model::Alert) -> Result<()> {
        info!(instrument = %alert.instrument, kind = %alert.kind, magnitude = alert.magnitude_pct, "alert notified");
        Ok(())
    }
}

struct LoggingAlertLog {
    next_id: std::sync::atomic::AtomicU64,
}
impl AlertLog for LoggingAlertLog {
    async fn append(&self, alert: &nse_pulse::model::Alert) -> Result<u64> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        info!(row_id = id, instrument = %alert.instrument, kind = %alert.kind, "alert logged");
        Ok(id)
    }
}

fn load_universe() -> Vec<Instrument> {
    let symbols = std::env::var("NSE_PULSE_SYMBOLS").unwrap_or_default();
    symbols
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .map(|symbol| Instrument {
            symbol,
            exchange: "NSE".to_string(),
            kind: InstrumentKind::Equity,
            expiry: None,
            strike: None,
            option_type: None,
            underlying: None,
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("nse-pulse starting up");

    let config_path = std::env::var("NSE_PULSE_CONFIG").unwrap_or_else(|_| "monitor_config.json".into());
    let config = MonitorConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %config_path, "failed to load config, using defaults");
        MonitorConfig::default()
    });

    let data_dir = std::env::var("NSE_PULSE_DATA_DIR").unwrap_or_else(|_| ".".into());
    let paths = StoragePaths {
        quote_cache_path: std::path::Path::new(&data_dir).join("quote_cache.db"),
        history_cache_path: std::path::Path::new(&data_dir).join("history_cache.db"),
        oi_baseline_path: std::path::Path::new(&data_dir).join("oi_baseline.json"),
        cooldown_path: std::path::Path::new(&data_dir).join("cooldown.json"),
    };

    let state = AppState::new(config, &paths)?;
    let state = Arc::new(state);

    let universe = load_universe();
    info!(count = universe.len(), "tradable universe loaded");

    let provider = Arc::new(StubProvider);
    let collector = Arc::new(nse_pulse::collector::Collector::new(StubProvider, state.quote_cache.clone(), (*state.calendar).clone(), &state.config));

    let fanout = Arc::new(AlertFanout::new(LoggingNotifier, LoggingAlertLog { next_id: std::sync::atomic::AtomicU64::new(1) }, state.enrichment_tx.clone()));

    let mut scheduler = Scheduler::new(state.calendar.clone());

    // C5: collector tick.
    {
        let collector = collector.clone();
        let universe = universe.clone();
        scheduler.register(
            MonitorSpec { name: "collector", cadence: std::time::Duration::from_secs(state.config.collector_tick_secs), eligible_phases: &[Phase::Open] },
            move || {
                let collector = collector.clone();
                let universe = universe.clone();
                async move {
                    collector.tick(&universe, Utc::now()).await;
                }
            },
        );
    }

    // C8: 5-minute-cadence monitor (P1-P4).
    {
        let state = state.clone();
        let fanout = fanout.clone();
        let universe = universe.clone();
        scheduler.register(
            MonitorSpec { name: "monitor_5m", cadence: std::time::Duration::from_secs(state.config.monitor_5m_tick_secs), eligible_phases: &[Phase::Open] },
            move || {
                let state = state.clone();
                let fanout = fanout.clone();
                let universe = universe.clone();
                async move {
                    run_5m_monitor_tick(&state, &fanout, &universe).await;
                }
            },
        );
    }

    // C8: 1-minute-cadence monitor (6-filter variant).
    {
        let state = state.clone();
        let fanout = fanout.clone();
        let universe = universe.clone();
        scheduler.register(
            MonitorSpec { name: "monitor_1m", cadence: std::time::Duration::from_secs(state.config.monitor_1m_tick_secs), eligible_phases: &[Phase::Open] },
            move || {
                let state = state.clone();
                let fanout = fanout.clone();
                let universe = universe.clone();
                async move {
                    run_1m_monitor_tick(&state, &fanout, &universe).await;
                }
            },
        );
    }

    // C11: enrichment worker.
    {
        let state = state.clone();
        let provider = provider.clone();
        scheduler.register(
            MonitorSpec { name: "enrichment", cadence: std::time::Duration::from_secs(state.config.enrichment_tick_secs), eligible_phases: &[Phase::Open, Phase::Post] },
            move || {
                let state = state.clone();
                let provider = provider.clone();
                async move {
                    state.enrichment.drain_queue();
                    state.enrichment.run_once(&state.history_cache, provider.as_ref(), &state.calendar, Utc::now()).await;
                }
            },
        );
    }

    info!("all monitors registered, running until shutdown signal");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");
    scheduler.shutdown().await;

    info!("nse-pulse shut down complete");
    Ok(())
}

async fn run_5m_monitor_tick(state: &AppState, fanout: &AlertFanout<LoggingNotifier, LoggingAlertLog>, universe: &[Instrument]) {
    let now = Utc::now();
    for instrument in universe {
        let points = state.snapshots.points(&instrument.symbol);
        let oi_snapshot = if instrument.is_derivative() {
            points.last().and_then(|p| p.open_interest).and_then(|oi| {
                state.oi_baselines.analyze(&instrument.symbol, oi, points.last().map(|p| p.price).unwrap_or(0.0))
            })
        } else {
            None
        };

        let today = now.with_timezone(&state.calendar.zone()).date_naive();
        let input = DetectorInput {
            symbol: &instrument.symbol,
            now,
            ring: &points,
            avg_volume_per_5m: state.snapshots.avg_volume_per_5m(&instrument.symbol),
            avg_volume_per_1m: state.snapshots.avg_volume_per_1m(&instrument.symbol),
            avg_daily_volume: nse_pulse::collector::average_daily_volume(&state.history_cache, &instrument.symbol, today)
                .unwrap_or(0.0),
            oi_snapshot,
        };
        for alert in detect_5m_cadence(&input, &state.config) {
            match state.cooldowns.should_emit(&alert.instrument, alert.kind, now, &state.config) {
                Ok(true) => {
                    fanout.dispatch(alert).await;
                }
                Ok(false) => {}
                Err(e) => error!(error = %e, "cooldown check failed"),
            }
        }
    }
}

async fn run_1m_monitor_tick(state: &AppState, fanout: &AlertFanout<LoggingNotifier, LoggingAlertLog>, universe: &[Instrument]) {
    let now = Utc::now();
    for instrument in universe {
        let points = state.snapshots.points(&instrument.symbol);
        let today = now.with_timezone(&state.calendar.zone()).date_naive();
        let input = DetectorInput {
            symbol: &instrument.symbol,
            now,
            ring: &points,
            avg_volume_per_5m: state.snapshots.avg_volume_per_5m(&instrument.symbol),
            avg_volume_per_1m: state.snapshots.avg_volume_per_1m(&instrument.symbol),
            avg_daily_volume: nse_pulse::collector::average_daily_volume(&state.history_cache, &instrument.symbol, today)
                .unwrap_or(0.0),
            oi_snapshot: None,
        };
        // Cooldown is one of the 6 filters, so probe first without
        // recording, then let should_emit make the authoritative call.
        for alert in detect_1m_cadence(&input, &state.config, false) {
            match state.cooldowns.should_emit(&alert.instrument, alert.kind, now, &state.config) {
                Ok(true) => {
                    fanout.dispatch(alert).await;
                }
                Ok(false) => {}
                Err(e) => error!(error = %e, "cooldown check failed"),
            }
        }
    }
}
