//! Publish-time windows, expressed in Beijing time (UTC+08:00, no DST) and
//! stored as UTC instants.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Asia/Shanghai has observed a fixed +08:00 since 1991.
pub const BEIJING: FixedOffset = match FixedOffset::east_opt(8 * 3600) {
    Some(offset) => offset,
    None => panic!("+08:00 is within a day"),
};

/// Inclusive `[begin, end]` range; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Calendar date in Beijing time for a UTC instant.
pub fn shanghai_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&BEIJING).date_naive()
}

/// 00:00:00 Beijing time on `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    // a fixed offset has exactly one UTC instant per local time
    Utc.from_utc_datetime(&(date.and_time(NaiveTime::default()) - BEIJING))
}

/// 23:59:59 Beijing time on `date`.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::days(1) - Duration::seconds(1)
}

impl DateWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Begin at the start of `begin`, end at the end of `end`.
    pub fn from_dates(begin: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            begin: begin.map(start_of_day),
            end: end.map(end_of_day),
        }
    }

    /// Today and the six days before it, in Beijing time.
    pub fn last_week(now: DateTime<Utc>) -> Self {
        let today = shanghai_date(now);
        let first = today - Duration::days(6);
        Self {
            begin: Some(start_of_day(first)),
            end: Some(end_of_day(today)),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.begin.is_some() || self.end.is_some()
    }

    /// An item without a timestamp only passes an unbounded window.
    pub fn contains(&self, published_at: Option<DateTime<Utc>>) -> bool {
        let Some(at) = published_at else {
            return !self.is_bounded();
        };
        self.begin.map_or(true, |b| at >= b) && self.end.map_or(true, |e| at <= e)
    }

    pub fn begin_epoch(&self) -> Option<i64> {
        self.begin.map(|b| b.timestamp())
    }

    pub fn end_epoch(&self) -> Option<i64> {
        self.end.map(|e| e.timestamp())
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.with_timezone(&BEIJING).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "*".to_string())
        };
        write!(f, "{} .. {} (+08:00)", side(self.begin), side(self.end))
    }
}
