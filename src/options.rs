// =============================================================================
// Option-Selling Evaluator (C13) — interface only
// =============================================================================
//
// Only the hard-veto gating and the entry/monitor/exit cadence are mandatory
// core behaviors; the composite score is a pluggable strategy supplied by
// the caller (spec.md §4.12's "subsequent intraday ticks... pluggable
// strategy" note).

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::model::OiAnalysis;

/// Market inputs the evaluator needs for one entry/monitor/exit decision.
#[derive(Debug, Clone)]
pub struct VolatilityContext {
    pub vix_level: f64,
    pub vix_3day_trend_pct: f64,
    pub iv_rank_pct: f64,
    pub realized_implied_ratio: f64,
    pub avg_daily_range_5d_pct: f64,
    pub avg_intraday_range_3d_pct: f64,
    pub oi_snapshot: Option<OiAnalysis>,
}

/// Outcome of the entry evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Avoid,
    Hold,
    Sell,
}

/// Recorded state of an open layered position, used by the exit/add-layer
/// triggers on subsequent ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryState {
    pub score_at_entry: f64,
    pub iv_rank_at_entry: f64,
    pub points_at_entry: f64,
    pub layers: u32,
    pub last_layer_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Pluggable composite-score strategy. The core only requires that it
/// return a finite score in `[0, 100]`; the weighting of Theta/Gamma/Vega/
/// VIX/regime/OI is intentionally left to the caller.
pub trait CompositeScorer: Send + Sync {
    fn score(&self, ctx: &VolatilityContext) -> f64;
}

/// Hard-veto gate (spec.md §4.12): any one veto forces `AVOID` with score 0
/// before the composite scorer is even consulted.
pub fn check_vetos(ctx: &VolatilityContext, cfg: &MonitorConfig) -> Option<&'static str> {
    if ctx.iv_rank_pct < cfg.iv_rank_floor {
        return Some("iv_rank below floor");
    }
    if ctx.realized_implied_ratio > cfg.rv_iv_cap {
        return Some("realized/implied ratio above cap");
    }
    if ctx.avg_daily_range_5d_pct > cfg.range_cap {
        return Some("5-day average daily range above cap");
    }
    None
}

/// Entry evaluation: veto gate, then (if clear) the pluggable score.
pub fn evaluate_entry(ctx: &VolatilityContext, cfg: &MonitorConfig, scorer: &dyn CompositeScorer) -> (Signal, f64) {
    if check_vetos(ctx, cfg).is_some() {
        return (Signal::Avoid, 0.0);
    }
    let score = scorer.score(ctx);
    let signal = if score >= 60.0 { Signal::Sell } else if score >= 30.0 { Signal::Hold } else { Signal::Avoid };
    (signal, score)
}

/// Exit trigger conditions against a recorded entry (spec.md §4.12): a
/// score drop of at least 20 points, or a veto tripping on the latest
/// context.
pub fn should_exit(entry: &EntryState, ctx: &VolatilityContext, cfg: &MonitorConfig, scorer: &dyn CompositeScorer) -> bool {
    if check_vetos(ctx, cfg).is_some() {
        return true;
    }
    let current_score = scorer.score(ctx);
    entry.score_at_entry - current_score >= 20.0
}

/// Add-layer trigger: at most `max_layers`, spaced at least
/// `add_min_interval_mins` apart, each requiring at least
/// `add_min_score_gain` points of improvement over the entry score.
pub fn should_add_layer(
    entry: &EntryState,
    ctx: &VolatilityContext,
    now: chrono::DateTime<chrono::Utc>,
    cfg: &MonitorConfig,
    scorer: &dyn CompositeScorer,
) -> bool {
    if entry.layers >= cfg.max_layers {
        return false;
    }
    if let Some(last) = entry.last_layer_at {
        if (now - last) < chrono::Duration::minutes(cfg.add_min_interval_mins) {
            return false;
        }
    }
    if check_vetos(ctx, cfg).is_some() {
        return false;
    }
    let current_score = scorer.score(ctx);
    current_score - entry.score_at_entry >= cfg.add_min_score_gain
}
