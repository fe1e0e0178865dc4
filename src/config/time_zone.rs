//! Time zone used when deriving wall-clock start times.
//!
//! Activity logs carry epoch milliseconds. The derived `start_time` is a
//! zone-less timestamp holding the wall-clock reading in this zone, which
//! defaults to the zone of the running process.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, InvalidTimeZoneSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeZoneConfig {
    /// Zone of the running process.
    #[default]
    Local,
    Utc,
    /// Fixed offset from UTC, written `+HH:MM` or `-HH:MM`.
    Fixed(FixedOffset),
}

impl TimeZoneConfig {
    /// Wall-clock reading of the instant `epoch_secs` in this zone.
    pub fn wall_clock(&self, epoch_secs: i64) -> Option<NaiveDateTime> {
        match self {
            TimeZoneConfig::Local => Local
                .timestamp_opt(epoch_secs, 0)
                .single()
                .map(|dt| dt.naive_local()),
            TimeZoneConfig::Utc => {
                DateTime::<Utc>::from_timestamp(epoch_secs, 0).map(|dt| dt.naive_utc())
            }
            TimeZoneConfig::Fixed(offset) => offset
                .timestamp_opt(epoch_secs, 0)
                .single()
                .map(|dt| dt.naive_local()),
        }
    }
}

impl fmt::Display for TimeZoneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZoneConfig::Local => f.write_str("local"),
            TimeZoneConfig::Utc => f.write_str("utc"),
            TimeZoneConfig::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

impl FromStr for TimeZoneConfig {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "local" => return Ok(TimeZoneConfig::Local),
            "utc" | "z" => return Ok(TimeZoneConfig::Utc),
            _ => {}
        }
        parse_offset(trimmed)
            .map(TimeZoneConfig::Fixed)
            .context(InvalidTimeZoneSnafu { value })
    }
}

impl TryFrom<String> for TimeZoneConfig {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeZoneConfig> for String {
    fn from(tz: TimeZoneConfig) -> Self {
        tz.to_string()
    }
}

/// Parse `+HH:MM`, `-HH:MM`, `+HHMM` or `+HH`.
fn parse_offset(value: &str) -> Option<FixedOffset> {
    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (
            digits[..2].parse::<i32>().ok()?,
            digits[2..].parse::<i32>().ok()?,
        ),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
