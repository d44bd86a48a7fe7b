// =============================================================================
// Shared data model — instruments, quotes, candles, alerts
// =============================================================================
//
// Mirrors spec.md §3. Every type here is plain data; the behavior that acts
// on it lives in the owning component module (snapshot rings in
// `snapshot.rs`, cooldown entries in `cooldown.rs`, etc).
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of tradable instrument this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Equity,
    Index,
    Future,
    Option,
}

/// Call or put, for option instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

/// Immutable identifier for a tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub kind: InstrumentKind,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub option_type: Option<OptionType>,
    /// The underlying this derivative references (symbol), if any.
    #[serde(default)]
    pub underlying: Option<String>,
}

impl Instrument {
    /// True for futures and options — instruments F&O-specific components
    /// (the OI pattern engine, the option evaluator) operate on.
    pub fn is_derivative(&self) -> bool {
        matches!(self.kind, InstrumentKind::Future | InstrumentKind::Option)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Snapshot of an instrument at a wall-clock instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    pub volume_today: f64,
    #[serde(default)]
    pub open_interest: Option<f64>,
    pub day_open: f64,
    pub day_high: f64,
    pub day_low: f64,
    pub day_close: f64,
    pub timestamp: DateTime<Utc>,
}

/// Candle interval granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1d")]
    D1,
}

impl IntervalKind {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            IntervalKind::M1 => "1m",
            IntervalKind::M5 => "5m",
            IntervalKind::M15 => "15m",
            IntervalKind::D1 => "1d",
        }
    }

    pub fn duration(self) -> chrono::Duration {
        match self {
            IntervalKind::M1 => chrono::Duration::minutes(1),
            IntervalKind::M5 => chrono::Duration::minutes(5),
            IntervalKind::M15 => chrono::Duration::minutes(15),
            IntervalKind::D1 => chrono::Duration::days(1),
        }
    }
}

/// OHLCV candle over a bounded interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument_token: String,
    pub interval: IntervalKind,
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Structural invariant from spec.md §3: `low <= open,close <= high`,
    /// `volume >= 0`.
    pub fn is_well_formed(&self) -> bool {
        self.volume >= 0.0
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

/// One minute-aligned point retained by the rolling snapshot store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPoint {
    pub cached_at: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
    pub open_interest: Option<f64>,
}

/// Up/down direction of a price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// Lookback horizon for change detection, or a non-horizon alert family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    M1,
    M5,
    M10,
    M30,
    VolumeSpike,
    OpenInterest,
}

/// Wire-stable alert kind identifiers (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    #[serde(rename = "1m_drop")]
    M1Drop,
    #[serde(rename = "1m_rise")]
    M1Rise,
    #[serde(rename = "5m_drop")]
    M5Drop,
    #[serde(rename = "5m_rise")]
    M5Rise,
    #[serde(rename = "10m_drop")]
    M10Drop,
    #[serde(rename = "10m_rise")]
    M10Rise,
    #[serde(rename = "30m_drop")]
    M30Drop,
    #[serde(rename = "30m_rise")]
    M30Rise,
    VolumeSpikeDrop,
    VolumeSpikeRise,
    OiLongBuildup,
    OiShortBuildup,
    OiShortCovering,
    OiLongUnwinding,
}

impl AlertKind {
    /// The wire identifier exactly as enumerated in spec.md §6.
    pub fn wire_id(self) -> &'static str {
        match self {
            AlertKind::M1Drop => "1m_drop",
            AlertKind::M1Rise => "1m_rise",
            AlertKind::M5Drop => "5m_drop",
            AlertKind::M5Rise => "5m_rise",
            AlertKind::M10Drop => "10m_drop",
            AlertKind::M10Rise => "10m_rise",
            AlertKind::M30Drop => "30m_drop",
            AlertKind::M30Rise => "30m_rise",
            AlertKind::VolumeSpikeDrop => "volume_spike_drop",
            AlertKind::VolumeSpikeRise => "volume_spike_rise",
            AlertKind::OiLongBuildup => "oi_long_buildup",
            AlertKind::OiShortBuildup => "oi_short_buildup",
            AlertKind::OiShortCovering => "oi_short_covering",
            AlertKind::OiLongUnwinding => "oi_long_unwinding",
        }
    }

    /// Priority group from spec.md §4.6 (lower number = higher priority).
    pub fn priority(self) -> u8 {
        match self {
            AlertKind::VolumeSpikeDrop | AlertKind::VolumeSpikeRise => 1,
            AlertKind::M5Drop | AlertKind::M5Rise => 2,
            AlertKind::M10Drop | AlertKind::M10Rise => 3,
            AlertKind::M30Drop | AlertKind::M30Rise => 4,
            AlertKind::M1Drop | AlertKind::M1Rise => 2,
            _ => 5,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_id())
    }
}

/// OI co-movement pattern classification (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OiPattern {
    LongBuildup,
    ShortBuildup,
    ShortCovering,
    LongUnwinding,
}

impl OiPattern {
    pub fn alert_kind(self) -> AlertKind {
        match self {
            OiPattern::LongBuildup => AlertKind::OiLongBuildup,
            OiPattern::ShortBuildup => AlertKind::OiShortBuildup,
            OiPattern::ShortCovering => AlertKind::OiShortCovering,
            OiPattern::LongUnwinding => AlertKind::OiLongUnwinding,
        }
    }
}

/// OI pattern strength band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OiStrength {
    Minimal,
    Significant,
    Strong,
    VeryStrong,
}

/// Dashboard/notification priority derived from strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OiPriority {
    Low,
    Medium,
    High,
}

/// Full OI analysis attached as context to a price alert (never emitted
/// alone — spec.md §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiAnalysis {
    pub pattern: OiPattern,
    pub oi_change_pct: f64,
    pub strength: OiStrength,
    pub priority: OiPriority,
}

/// A decision to notify, from creation through enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub instrument: String,
    pub kind: AlertKind,
    pub direction: Direction,
    pub magnitude_pct: f64,
    pub horizon: Horizon,
    pub reference_price: f64,
    pub current_price: f64,
    #[serde(default)]
    pub volume_multiple: Option<f64>,
    #[serde(default)]
    pub oi_snapshot: Option<OiAnalysis>,
    pub timestamp: DateTime<Utc>,
    /// Assigned by the alert log on append; `None` until logged.
    #[serde(default)]
    pub row_id: Option<u64>,
}

/// Which enrichment slot a price belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentSlot {
    Plus2m,
    Plus10m,
    Eod,
}

/// Derived completeness of an enrichment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    Partial,
    Complete,
}

/// `(row_id, instrument, alert_timestamp)` plus the three enrichment slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub row_id: u64,
    pub instrument: String,
    pub alert_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub price_plus_2m: Option<f64>,
    #[serde(default)]
    pub price_plus_10m: Option<f64>,
    #[serde(default)]
    pub price_eod: Option<f64>,
    #[serde(default)]
    pub retries: u32,
}

impl EnrichmentRecord {
    pub fn new(row_id: u64, instrument: impl Into<String>, alert_timestamp: DateTime<Utc>) -> Self {
        Self {
            row_id,
            instrument: instrument.into(),
            alert_timestamp,
            price_plus_2m: None,
            price_plus_10m: None,
            price_eod: None,
            retries: 0,
        }
    }

    /// Status derives from which slots are populated (spec.md §3): complete
    /// requires all three, pending requires none, partial is everything
    /// in between.
    pub fn status(&self) -> EnrichmentStatus {
        let filled = self.price_plus_2m.is_some() as u8
            + self.price_plus_10m.is_some() as u8
            + self.price_eod.is_some() as u8;
        match filled {
            0 => EnrichmentStatus::Pending,
            3 => EnrichmentStatus::Complete,
            _ => EnrichmentStatus::Partial,
        }
    }

    pub fn slot_value(&self, slot: EnrichmentSlot) -> Option<f64> {
        match slot {
            EnrichmentSlot::Plus2m => self.price_plus_2m,
            EnrichmentSlot::Plus10m => self.price_plus_10m,
            EnrichmentSlot::Eod => self.price_eod,
        }
    }

    /// Write a slot. Once written, a slot is never rewritten (spec.md §3) —
    /// returns `false` (and leaves the record untouched) if already filled.
    pub fn fill_slot(&mut self, slot: EnrichmentSlot, value: f64) -> bool {
        let target = match slot {
            EnrichmentSlot::Plus2m => &mut self.price_plus_2m,
            EnrichmentSlot::Plus10m => &mut self.price_plus_10m,
            EnrichmentSlot::Eod => &mut self.price_eod,
        };
        if target.is_some() {
            return false;
        }
        *target = Some(value);
        true
    }
}
