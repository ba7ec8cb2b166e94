//! Timestamp column parsing
//!
//! A timestamp cell is either a Unix epoch number (taken as UTC seconds, fractional part
//! truncated) or a calendar date/time string. Strings without an explicit offset are
//! interpreted in the source's configured zone.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use siphon_common::SiphonError;
use std::fmt;
use std::str::FromStr;

/// Date/time layouts carrying their own UTC offset
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Zone-less date/time layouts seen in instrument exports
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%d-%b-%Y %H:%M:%S",
    "%d-%b-%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m/%d/%y"];

/// Zone used for timestamp strings that carry no offset.
///
/// Accepts `UTC` (also `GMT`, `Z`), `local`, a fixed offset such as `-09:00`, or an IANA
/// zone name such as `America/Anchorage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeZoneSpec {
    #[default]
    Utc,
    Local,
    Fixed(FixedOffset),
    Named(Tz),
}

impl FromStr for TimeZoneSpec {
    type Err = SiphonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "utc" | "gmt" | "z" | "etc/utc" => return Ok(TimeZoneSpec::Utc),
            "local" => return Ok(TimeZoneSpec::Local),
            _ => {},
        }

        if let Some(offset) = parse_offset(trimmed) {
            return Ok(TimeZoneSpec::Fixed(offset));
        }
        trimmed.parse::<Tz>().map(TimeZoneSpec::Named).map_err(|_| {
            SiphonError::config(format!(
                "unknown time zone '{}': use UTC, local, an offset like -09:00, or a name like America/Anchorage",
                s
            ))
        })
    }
}

impl TryFrom<String> for TimeZoneSpec {
    type Error = SiphonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeZoneSpec> for String {
    fn from(value: TimeZoneSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeZoneSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZoneSpec::Utc => f.write_str("UTC"),
            TimeZoneSpec::Local => f.write_str("local"),
            TimeZoneSpec::Fixed(offset) => write!(f, "{}", offset),
            TimeZoneSpec::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// `+HH:MM`, `-HH:MM`, `+HHMM` or `+HH`
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        3 => (digits[..1].parse::<i32>().ok()?, digits[1..].parse::<i32>().ok()?),
        _ => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Converts timestamp cells to Unix epoch seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampParser {
    tz: TimeZoneSpec,
}

impl TimestampParser {
    pub fn new(tz: TimeZoneSpec) -> Self {
        Self { tz }
    }

    /// Parse a cell, or `None` if it is empty, NaN, or not a recognizable date.
    pub fn parse(&self, raw: &str) -> Option<i64> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(epoch) = raw.parse::<f64>() {
            return epoch.is_finite().then(|| epoch.trunc() as i64);
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.timestamp());
        }

        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
                return Some(dt.timestamp());
            }
        }

        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return self.localize(naive);
            }
        }

        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
                return self.localize(date.and_hms_opt(0, 0, 0)?);
            }
        }

        None
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<i64> {
        match self.tz {
            TimeZoneSpec::Utc => Some(naive.and_utc().timestamp()),
            TimeZoneSpec::Fixed(offset) => offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.timestamp()),
            // Ambiguous wall-clock times during a DST fall-back resolve to the first instant.
            TimeZoneSpec::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp()),
            TimeZoneSpec::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp()),
        }
    }
}
