//! Timestamp normalization for display.
//!
//! Stored documents carry time values in several shapes: server-assigned
//! timestamps, serialized `{seconds, nanoseconds}` pairs (both the client
//! and the admin `_seconds` spelling), pre-formatted strings, native dates,
//! and the occasional epoch-millis number. Everything funnels through
//! [`RawTime`] and is rendered by [`TimeFormatter`], which never fails:
//! malformed values degrade to a placeholder label.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// Label returned by [`TimeFormatter::format_time`] for unusable values.
pub const INVALID_TIME: &str = "Invalid time";
/// Label returned by the date formatters for unusable values.
pub const INVALID_DATE: &str = "Invalid date";
/// Label returned by the date formatters for absent values.
pub const NOT_AVAILABLE: &str = "N/A";

/// Handle for a timestamp assigned by the store at commit time.
///
/// A local echo of a write that has not been acknowledged yet carries an
/// unresolved handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimestamp(Option<DateTime<Utc>>);

impl ServerTimestamp {
    /// A timestamp the store has already assigned.
    pub fn resolved(at: DateTime<Utc>) -> Self {
        Self(Some(at))
    }

    /// A timestamp still waiting on the store.
    pub fn pending() -> Self {
        Self(None)
    }

    /// Convert to a date, if resolved.
    pub fn to_date(&self) -> Option<DateTime<Utc>> {
        self.0
    }
}

/// Any time representation found in stored or pushed documents.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTime {
    /// Field missing or null
    Absent,
    /// Server-assigned timestamp handle
    Server(ServerTimestamp),
    /// Serialized `{seconds, nanoseconds}` pair
    Parts { seconds: i64, nanoseconds: i64 },
    /// Pre-formatted string, displayed verbatim
    Text(String),
    /// Native date
    Date(DateTime<Utc>),
    /// Anything else
    Other(Value),
}

impl RawTime {
    /// Best-effort conversion to an instant.
    ///
    /// Strings are tried as RFC 3339 and as plain `YYYY-MM-DD` dates so that
    /// legacy documents still sort sensibly.
    pub fn to_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTime::Absent => None,
            RawTime::Server(handle) => handle.to_date(),
            RawTime::Parts {
                seconds,
                nanoseconds,
            } => parts_to_instant(*seconds, *nanoseconds),
            RawTime::Text(text) => parse_text(text),
            RawTime::Date(at) => Some(*at),
            RawTime::Other(value) => value_to_instant(value),
        }
    }

    /// Encode for storage. Instants are written as `{seconds, nanoseconds}`.
    pub fn to_json(&self) -> Value {
        match self {
            RawTime::Absent => Value::Null,
            RawTime::Server(handle) => match handle.to_date() {
                Some(at) => instant_to_json(at),
                None => Value::Null,
            },
            RawTime::Parts {
                seconds,
                nanoseconds,
            } => json!({ "seconds": seconds, "nanoseconds": nanoseconds }),
            RawTime::Text(text) => Value::String(text.clone()),
            RawTime::Date(at) => instant_to_json(*at),
            RawTime::Other(value) => value.clone(),
        }
    }
}

impl From<&Value> for RawTime {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => RawTime::Absent,
            Value::String(text) => RawTime::Text(text.clone()),
            Value::Object(map) => {
                let seconds = map.get("seconds").or_else(|| map.get("_seconds"));
                let nanoseconds = map.get("nanoseconds").or_else(|| map.get("_nanoseconds"));
                match (seconds.and_then(Value::as_i64), nanoseconds.and_then(Value::as_i64)) {
                    (Some(seconds), Some(nanoseconds)) => RawTime::Parts {
                        seconds,
                        nanoseconds,
                    },
                    _ => RawTime::Other(value.clone()),
                }
            }
            other => RawTime::Other(other.clone()),
        }
    }
}

impl From<DateTime<Utc>> for RawTime {
    fn from(at: DateTime<Utc>) -> Self {
        RawTime::Date(at)
    }
}

impl From<Option<DateTime<Utc>>> for RawTime {
    fn from(at: Option<DateTime<Utc>>) -> Self {
        at.map(RawTime::Date).unwrap_or(RawTime::Absent)
    }
}

impl Serialize for RawTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RawTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(RawTime::from(&value))
    }
}

fn instant_to_json(at: DateTime<Utc>) -> Value {
    json!({
        "seconds": at.timestamp(),
        "nanoseconds": at.timestamp_subsec_nanos(),
    })
}

fn parts_to_instant(seconds: i64, nanoseconds: i64) -> Option<DateTime<Utc>> {
    let millis = seconds
        .checked_mul(1000)?
        .checked_add(nanoseconds / 1_000_000)?;
    DateTime::from_timestamp_millis(millis)
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn value_to_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            let millis = number
                .as_i64()
                .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis)
        }
        _ => None,
    }
}

/// Outcome of resolving a raw value against the display policy.
enum Resolved<'a> {
    Missing,
    Verbatim(&'a str),
    Instant(DateTime<FixedOffset>),
    Invalid,
}

/// Formats heterogeneous time values for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFormatter {
    offset: FixedOffset,
}

impl Default for TimeFormatter {
    fn default() -> Self {
        Self::utc()
    }
}

impl TimeFormatter {
    /// Formatter rendering in UTC.
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Formatter rendering at a fixed offset.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Formatter for an offset in minutes east of UTC.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        let seconds = minutes.checked_mul(60)?;
        FixedOffset::east_opt(seconds).map(Self::new)
    }

    /// Display offset.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Time of day, e.g. `09:05 AM`. Absent values render as an empty string.
    pub fn format_time(&self, value: &RawTime) -> String {
        match self.resolve(value) {
            Resolved::Missing => String::new(),
            Resolved::Verbatim(text) => text.to_string(),
            Resolved::Instant(at) => at.format("%I:%M %p").to_string(),
            Resolved::Invalid => INVALID_TIME.to_string(),
        }
    }

    /// Short date, e.g. `4/15/1985`. Absent values render as `N/A`.
    pub fn format_date(&self, value: &RawTime) -> String {
        match self.resolve(value) {
            Resolved::Missing => NOT_AVAILABLE.to_string(),
            Resolved::Verbatim(text) => text.to_string(),
            Resolved::Instant(at) => format!("{}/{}/{}", at.month(), at.day(), at.year()),
            Resolved::Invalid => INVALID_DATE.to_string(),
        }
    }

    /// Long date, e.g. `Apr 15, 1985`. Absent values render as `N/A`.
    pub fn format_long_date(&self, value: &RawTime) -> String {
        match self.resolve(value) {
            Resolved::Missing => NOT_AVAILABLE.to_string(),
            Resolved::Verbatim(text) => text.to_string(),
            Resolved::Instant(at) => at.format("%b %-d, %Y").to_string(),
            Resolved::Invalid => INVALID_DATE.to_string(),
        }
    }

    fn resolve<'a>(&self, value: &'a RawTime) -> Resolved<'a> {
        let instant = match value {
            RawTime::Absent => return Resolved::Missing,
            // Unacknowledged writes have no time yet.
            RawTime::Server(handle) => match handle.to_date() {
                Some(at) => Some(at),
                None => return Resolved::Missing,
            },
            RawTime::Parts {
                seconds,
                nanoseconds,
            } => parts_to_instant(*seconds, *nanoseconds),
            RawTime::Text(text) => return Resolved::Verbatim(text),
            RawTime::Date(at) => Some(*at),
            RawTime::Other(other) => value_to_instant(other),
        };

        match instant {
            Some(at) => Resolved::Instant(at.with_timezone(&self.offset)),
            None => Resolved::Invalid,
        }
    }
}
