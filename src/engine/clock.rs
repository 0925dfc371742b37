//! Business-day clock: maps civil dates to absolute instant windows.
//!
//! The business day rolls over at a fixed local hour (06:00 by default), not at
//! midnight. Everything that buckets transactions by day goes through here.

use chrono::{Datelike, FixedOffset, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use thiserror::Error;

use crate::domain::{BusinessDate, TimeMs};

pub const DEFAULT_BOUNDARY_HOUR: u32 = 6;
/// UTC+8 (Asia/Kuala_Lumpur, which observes no daylight saving).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 8 * 60;

/// Business dates are keyed `YYYY-MM-DD`, so years stay within four digits.
const MAX_BUSINESS_YEAR: i32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("instant {0} ms has no business date in years 0000-9999")]
pub struct InstantOutOfRange(pub i64);

/// Inclusive instant window `[start, end]` of one business day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessWindow {
    pub start: TimeMs,
    pub end: TimeMs,
}

impl BusinessWindow {
    pub fn contains(&self, at: TimeMs) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessClock {
    offset: FixedOffset,
    boundary: NaiveTime,
}

impl BusinessClock {
    /// Returns `None` for an offset outside ±24h or an hour above 23.
    pub fn new(utc_offset_minutes: i32, boundary_hour: u32) -> Option<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
        let boundary = NaiveTime::from_hms_opt(boundary_hour, 0, 0)?;
        Some(Self { offset, boundary })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// `[date boundary:00:00.000, date+1 boundary-1:59:59.999]` in local time.
    pub fn window_for(&self, date: BusinessDate) -> BusinessWindow {
        let start = self.boundary_instant(date);
        let next = self.boundary_instant(date.succ());
        BusinessWindow {
            start,
            end: TimeMs::new(next.as_ms() - 1),
        }
    }

    /// Window spanning every business day in `[start, end]`.
    pub fn window_for_range(&self, start: BusinessDate, end: BusinessDate) -> BusinessWindow {
        BusinessWindow {
            start: self.window_for(start).start,
            end: self.window_for(end).end,
        }
    }

    /// Business date an instant belongs to: the local date, or the day before
    /// when the local time of day is earlier than the boundary.
    ///
    /// # Errors
    /// Returns `InstantOutOfRange` when the date would fall outside years
    /// 0000-9999.
    pub fn today_key(&self, now: TimeMs) -> Result<BusinessDate, InstantOutOfRange> {
        let out_of_range = InstantOutOfRange(now.as_ms());
        let local = now
            .to_utc()
            .ok_or(out_of_range)?
            .with_timezone(&self.offset)
            .naive_local();
        let date = BusinessDate::new(local.date());
        let date = if local.time() < self.boundary {
            date.pred()
        } else {
            date
        };
        if !(0..=MAX_BUSINESS_YEAR).contains(&date.naive().year()) {
            return Err(out_of_range);
        }
        Ok(date)
    }

    fn boundary_instant(&self, date: BusinessDate) -> TimeMs {
        let local = NaiveDateTime::new(date.naive(), self.boundary);
        let utc = local - chrono::Duration::seconds(i64::from(self.offset.local_minus_utc()));
        TimeMs::from(Utc.from_utc_datetime(&utc))
    }
}

impl Default for BusinessClock {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60)
                .unwrap_or_else(|| Utc.fix()),
            boundary: NaiveTime::from_hms_opt(DEFAULT_BOUNDARY_HOUR, 0, 0).unwrap_or_default(),
        }
    }
}
