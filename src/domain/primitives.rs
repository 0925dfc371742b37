//! Domain primitives: TimeMs, GroupId, BusinessDate.

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Convert to a UTC instant; `None` outside the range chrono represents.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for TimeMs {
    fn from(value: DateTime<Utc>) -> Self {
        TimeMs(value.timestamp_millis())
    }
}

/// Identifier of an operating group (a chat, a desk, a merchant).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    /// Create a GroupId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        GroupId(id.into())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid business date {0:?}, expected YYYY-MM-DD")]
pub struct BusinessDateParseError(pub String);

/// Civil date naming one business day (06:00 to 05:59:59.999 local by default).
///
/// Formats and orders as `YYYY-MM-DD`, so string comparison in the store agrees
/// with date comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusinessDate(NaiveDate);

impl BusinessDate {
    pub fn new(date: NaiveDate) -> Self {
        BusinessDate(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(BusinessDate)
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    /// The next civil day, saturating at the end of the calendar.
    pub fn succ(&self) -> Self {
        BusinessDate(self.0.checked_add_days(Days::new(1)).unwrap_or(self.0))
    }

    /// The previous civil day, saturating at the start of the calendar.
    pub fn pred(&self) -> Self {
        BusinessDate(self.0.checked_sub_days(Days::new(1)).unwrap_or(self.0))
    }

    /// Every date in `[self, end]`, ascending. Empty when `end < self`.
    pub fn iter_through(self, end: BusinessDate) -> impl Iterator<Item = BusinessDate> {
        self.0
            .iter_days()
            .take_while(move |d| *d <= end.0)
            .map(BusinessDate)
    }

    pub fn as_key(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for BusinessDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for BusinessDate {
    type Err = BusinessDateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 10 {
            return Err(BusinessDateParseError(s.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(BusinessDate)
            .map_err(|_| BusinessDateParseError(s.to_string()))
    }
}

impl TryFrom<String> for BusinessDate {
    type Error = BusinessDateParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BusinessDate> for String {
    fn from(value: BusinessDate) -> Self {
        value.as_key()
    }
}
