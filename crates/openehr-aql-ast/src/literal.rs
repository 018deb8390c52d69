//! Primitive operands of AQL conditions and predicates

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A primitive value in AQL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    /// String literal
    String(String),
    /// Integer literal
    Long(i64),
    /// Real literal (exact decimal)
    Decimal(Decimal),
    /// Boolean literal (true/false)
    Boolean(bool),
    /// Date, time or date-time literal recognized by the parser
    Temporal(TemporalValue),
}

impl Primitive {
    pub fn string(value: impl Into<String>) -> Self {
        Primitive::String(value.into())
    }

    /// The string value, if this is a string literal
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a numeric literal
    pub fn is_numeric(&self) -> bool {
        matches!(self, Primitive::Long(_) | Primitive::Decimal(_))
    }

    /// Numeric value as a decimal, if numeric
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Primitive::Long(l) => Some(Decimal::from(*l)),
            Primitive::Decimal(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::String(s) => write!(f, "'{s}'"),
            Primitive::Long(l) => write!(f, "{l}"),
            Primitive::Decimal(d) => write!(f, "{d}"),
            Primitive::Boolean(b) => write!(f, "{b}"),
            Primitive::Temporal(t) => write!(f, "'{t}'"),
        }
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::String(s.to_string())
    }
}

impl From<i64> for Primitive {
    fn from(l: i64) -> Self {
        Primitive::Long(l)
    }
}

impl From<TemporalValue> for Primitive {
    fn from(t: TemporalValue) -> Self {
        Primitive::Temporal(t)
    }
}

/// A temporal literal in ISO 8601 format (extended or basic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalValue {
    /// Calendar date
    Date(NaiveDate),
    /// Time of day with optional zone offset
    Time {
        time: NaiveTime,
        #[serde(with = "offset_seconds")]
        offset: Option<FixedOffset>,
    },
    /// Date and time with optional zone offset
    DateTime {
        date_time: NaiveDateTime,
        #[serde(with = "offset_seconds")]
        offset: Option<FixedOffset>,
    },
}

/// Zone offsets as seconds east of UTC
mod offset_seconds {
    use chrono::FixedOffset;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(offset: &Option<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error> {
        offset.map(|o| o.local_minus_utc()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<FixedOffset>, D::Error> {
        Option::<i32>::deserialize(deserializer)?
            .map(|seconds| {
                FixedOffset::east_opt(seconds)
                    .ok_or_else(|| D::Error::custom(format!("zone offset out of range: {seconds}")))
            })
            .transpose()
    }
}

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y%m%d"];
const TIME_FORMATS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M", "%H%M%S%.f"];

impl TemporalValue {
    /// Whether the value carries year/month/day fields
    pub fn has_date(&self) -> bool {
        !matches!(self, TemporalValue::Time { .. })
    }

    /// Whether the value carries time-of-day fields
    pub fn has_time(&self) -> bool {
        !matches!(self, TemporalValue::Date(_))
    }

    /// Parse an ISO 8601 date, time or date-time.
    ///
    /// Accepts the extended (`2021-05-01T10:30:00.123+02:00`) and the basic
    /// (`20210501T103000Z`) notation; time values may carry a leading `T`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(time) = text.strip_prefix('T') {
            return parse_time_with_offset(time).map(|(time, offset)| TemporalValue::Time { time, offset });
        }
        if let Some((date, time)) = text.split_once('T') {
            let date = parse_date(date)?;
            let (time, offset) = parse_time_with_offset(time)?;
            return Some(TemporalValue::DateTime {
                date_time: date.and_time(time),
                offset,
            });
        }
        if text.contains(':') {
            return parse_time_with_offset(text).map(|(time, offset)| TemporalValue::Time { time, offset });
        }
        parse_date(text).map(TemporalValue::Date)
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

fn parse_time_with_offset(text: &str) -> Option<(NaiveTime, Option<FixedOffset>)> {
    let (time, offset) = split_offset(text)?;
    let time = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time, fmt).ok())?;
    Some((time, offset))
}

/// Split a trailing zone designator (`Z`, `+hh`, `+hhmm`, `+hh:mm`) from a time
fn split_offset(text: &str) -> Option<(&str, Option<FixedOffset>)> {
    if let Some(time) = text.strip_suffix('Z') {
        return Some((time, FixedOffset::east_opt(0)));
    }
    let Some(idx) = text.rfind(['+', '-']) else {
        return Some((text, None));
    };
    let (time, zone) = text.split_at(idx);
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits: String = zone[1..].chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
    Some((time, Some(offset)))
}

impl fmt::Display for TemporalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            TemporalValue::Time { time, offset } => {
                write!(f, "{}", time.format("%H:%M:%S%.f"))?;
                write_offset(f, offset)
            }
            TemporalValue::DateTime { date_time, offset } => {
                write!(f, "{}", date_time.format("%Y-%m-%dT%H:%M:%S%.f"))?;
                write_offset(f, offset)
            }
        }
    }
}

fn write_offset(f: &mut fmt::Formatter<'_>, offset: &Option<FixedOffset>) -> fmt::Result {
    match offset {
        Some(o) if o.local_minus_utc() == 0 => f.write_str("Z"),
        Some(o) => write!(f, "{o}"),
        None => Ok(()),
    }
}
