// =============================================================================
// Clock & Calendar (C1) — pure function of a timestamp and a static holiday set
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use tracing::warn;

use crate::config::MonitorConfig;

/// Market phase for a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Pre,
    Open,
    Post,
}

/// Calendar holding the configured timezone offset and a static holiday set,
/// keyed by calendar year.
#[derive(Debug, Clone)]
pub struct Calendar {
    zone: FixedOffset,
    open_time: NaiveTime,
    close_time: NaiveTime,
    holidays_by_year: HashMap<i32, HashSet<NaiveDate>>,
}

fn parse_hhmm(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap_or_else(|_| NaiveTime::from_hms_opt(9, 15, 0).unwrap())
}

impl Calendar {
    /// Build a calendar from config. The holiday set starts empty; populate
    /// it with [`Calendar::set_holidays`] (ingestion is an external
    /// collaborator, out of scope per spec.md §1).
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        let zone = FixedOffset::east_opt(cfg.timezone_offset_mins * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        Self {
            zone,
            open_time: parse_hhmm(&cfg.market_open),
            close_time: parse_hhmm(&cfg.market_close),
            holidays_by_year: HashMap::new(),
        }
    }

    /// Replace the holiday set for a given calendar year.
    pub fn set_holidays(&mut self, year: i32, holidays: HashSet<NaiveDate>) {
        self.holidays_by_year.insert(year, holidays);
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.zone).date_naive()
    }

    /// `false` on weekends; `false` if `date` is in the configured holiday
    /// set for its calendar year; fails open (warns, returns true) if the
    /// year has no configured holiday list at all (spec.md §4.1, §9).
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        match self.holidays_by_year.get(&date.year()) {
            Some(holidays) => !holidays.contains(&date),
            None => {
                warn!(year = date.year(), "no holiday list configured for year — failing open (assuming trading day)");
                true
            }
        }
    }

    /// `Open` iff `is_trading_day` and the local time-of-day falls within
    /// `[market_open, market_close]`.
    pub fn phase(&self, ts: DateTime<Utc>) -> Phase {
        let local = ts.with_timezone(&self.zone);
        let date = local.date_naive();
        if !self.is_trading_day(date) {
            return Phase::Closed;
        }
        let t = local.time();
        if t < self.open_time {
            Phase::Pre
        } else if t <= self.close_time {
            Phase::Open
        } else {
            Phase::Post
        }
    }

    /// `(open_ts, close_ts)` for the given local calendar date, in UTC.
    pub fn session_boundaries(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let open_local = self
            .zone
            .from_local_datetime(&date.and_time(self.open_time))
            .single()
            .expect("market open time is unambiguous in a fixed-offset zone");
        let close_local = self
            .zone
            .from_local_datetime(&date.and_time(self.close_time))
            .single()
            .expect("market close time is unambiguous in a fixed-offset zone");
        (open_local.with_timezone(&Utc), close_local.with_timezone(&Utc))
    }

    /// Minutes elapsed since session open for `ts`, clamped to zero before
    /// open. Used by the detector to suppress horizons longer than the
    /// elapsed session (spec.md §8 boundary behavior).
    pub fn minutes_since_open(&self, ts: DateTime<Utc>) -> i64 {
        let date = self.local_date(ts);
        let (open_ts, _) = self.session_boundaries(date);
        let delta = ts.signed_duration_since(open_ts);
        delta.num_minutes().max(0)
    }

    /// Truncate a timestamp down to the start of its minute, in UTC — the
    /// `cached_at` convention used throughout the collector and snapshot
    /// ring (spec.md §4.4, §4.5).
    pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(ts)
    }
}
