//! Temporal literal handling
//!
//! Ordered values are compared by magnitude: days since the epoch for dates, seconds
//! since the epoch for date-times, seconds since midnight for times and seconds for
//! durations.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use once_cell::sync::Lazy;
use openehr_aql_ast::{Primitive, TemporalValue};
use regex::Regex;
use rust_decimal::Decimal;

/// `num_days_from_ce` of 1970-01-01
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

const SECONDS_PER_YEAR: i64 = 31_556_952;
const SECONDS_PER_MONTH: i64 = 2_629_746;
const SECONDS_PER_WEEK: i64 = 604_800;
const SECONDS_PER_DAY: i64 = 86_400;

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(-)?P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:[.,]\d+)?)S)?)?$",
    )
    .expect("valid regex")
});

/// Parse date-times and times with sub-millisecond precision that were left as strings.
///
/// Only the extended (`2021-05-01T10:30:00.1234`) and basic (`20210501T103000.1234`)
/// date-time layouts and plain times with a fraction are considered.
pub fn parse_with_higher_precision(text: &str) -> Option<TemporalValue> {
    let dot = text.find('.')?;
    let t = text.find('T');
    let len = text.len();
    let date_time = (dot == 19 && t == Some(10) && len > 20) || (dot == 15 && t == Some(8) && len > 16);
    let time = t.is_none() && ((dot == 8 && len > 9) || (dot == 10 && len > 11));
    if !(date_time || time) {
        return None;
    }
    TemporalValue::parse(text).filter(|v| if date_time { v.has_date() && v.has_time() } else { !v.has_date() })
}

/// A string or temporal literal as offset date-time.
///
/// Dates are taken at the start of the day and local date-times as UTC; values
/// without a date yield `None`.
pub fn to_offset_date_time(value: &Primitive) -> Option<DateTime<FixedOffset>> {
    let temporal = match value {
        Primitive::Temporal(t) => *t,
        Primitive::String(s) => parse_with_higher_precision(s).or_else(|| TemporalValue::parse(s))?,
        _ => return None,
    };
    match temporal {
        TemporalValue::Time { .. } => None,
        TemporalValue::DateTime {
            date_time,
            offset: Some(offset),
        } => offset.from_local_datetime(&date_time).single(),
        TemporalValue::DateTime { date_time, offset: None } => Some(date_time.and_utc().fixed_offset()),
        TemporalValue::Date(date) => Some(date.and_time(NaiveTime::MIN).and_utc().fixed_offset()),
    }
}

/// Days since 1970-01-01
pub fn date_magnitude(date: NaiveDate) -> Decimal {
    Decimal::from(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
}

/// Seconds since the epoch; local date-times are taken as UTC
pub fn date_time_magnitude(date_time: NaiveDateTime, offset: Option<FixedOffset>) -> Decimal {
    let utc = match offset {
        Some(offset) => date_time - offset,
        None => date_time,
    };
    let utc = utc.and_utc();
    Decimal::from(utc.timestamp()) + Decimal::new(i64::from(utc.timestamp_subsec_nanos()), 9)
}

/// Seconds since midnight of the local time
pub fn time_magnitude(time: NaiveTime) -> Decimal {
    Decimal::from(time.num_seconds_from_midnight()) + Decimal::new(i64::from(time.nanosecond() % 1_000_000_000), 9)
}

/// Seconds of an ISO 8601 duration (`P1Y2M3DT4H5M6.7S`)
pub fn duration_magnitude(text: &str) -> Option<Decimal> {
    let caps = DURATION_PATTERN.captures(text)?;
    // a bare `P` or `PT` carries no component
    if (2..=8).all(|i| caps.get(i).is_none()) || text.ends_with('T') {
        return None;
    }
    let unit = |i: usize, seconds: i64| -> Option<Decimal> {
        match caps.get(i) {
            Some(m) => m.as_str().parse::<i64>().ok()?.checked_mul(seconds).map(Decimal::from),
            None => Some(Decimal::ZERO),
        }
    };
    let seconds = match caps.get(8) {
        Some(m) => m.as_str().replace(',', ".").parse::<Decimal>().ok()?,
        None => Decimal::ZERO,
    };
    let total = unit(2, SECONDS_PER_YEAR)?
        + unit(3, SECONDS_PER_MONTH)?
        + unit(4, SECONDS_PER_WEEK)?
        + unit(5, SECONDS_PER_DAY)?
        + unit(6, 3_600)?
        + unit(7, 60)?
        + seconds;
    Some(if caps.get(1).is_some() { -total } else { total })
}
