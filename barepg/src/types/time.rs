//! Temporal text formats.
//!
//! Postgres renders temporal types in ISO style, `YYYY-MM-DD HH:MM:SS[.ffffff][+hh[:mm[:ss]]]`.
use std::fmt;
use time::{
    Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
};

use crate::{Value, row::DecodeError};

const DATE: &[I<'_>] = &[
    I::Component(C::Year(modifier::Year::default())),
    I::Literal(b"-"),
    I::Component(C::Month(modifier::Month::default())),
    I::Literal(b"-"),
    I::Component(C::Day(modifier::Day::default())),
];

const SUBSECOND: &[I<'_>] = &[
    I::Literal(b"."),
    I::Component(C::Subsecond(modifier::Subsecond::default())),
];

const TIME: &[I<'_>] = &[
    I::Component(C::Hour(modifier::Hour::default())),
    I::Literal(b":"),
    I::Component(C::Minute(modifier::Minute::default())),
    I::Literal(b":"),
    I::Component(C::Second(modifier::Second::default())),
    I::Optional(&I::Compound(SUBSECOND)),
];

const HMS: &[I<'_>] = &[
    I::Component(C::Hour(modifier::Hour::default())),
    I::Literal(b":"),
    I::Component(C::Minute(modifier::Minute::default())),
    I::Literal(b":"),
    I::Component(C::Second(modifier::Second::default())),
];

pub(crate) fn decode_date(raw: &[u8]) -> Result<Value, DecodeError> {
    let s = std::str::from_utf8(raw)?;
    parse_date(s)
        .map(Value::Date)
        .ok_or_else(|| DecodeError::invalid("date", raw))
}

pub(crate) fn decode_time(raw: &[u8]) -> Result<Value, DecodeError> {
    let s = std::str::from_utf8(raw)?;
    match split_offset(s) {
        (time, None) => parse_time(time).map(Value::Time),
        (time, Some(offset)) => parse_time(time).zip(parse_offset(offset)).map(|(t, o)| Value::TimeTz(t, o)),
    }
    .ok_or_else(|| DecodeError::invalid("time", raw))
}

pub(crate) fn decode_timestamp(raw: &[u8]) -> Result<Value, DecodeError> {
    let s = std::str::from_utf8(raw)?;
    let parse = || {
        let (date, time) = s.split_once(' ')?;
        let date = parse_date(date)?;
        match split_offset(time) {
            (time, None) => Some(Value::Timestamp(PrimitiveDateTime::new(date, parse_time(time)?))),
            (time, Some(offset)) => Some(Value::TimestampTz(
                PrimitiveDateTime::new(date, parse_time(time)?).assume_offset(parse_offset(offset)?),
            )),
        }
    };
    parse().ok_or_else(|| DecodeError::invalid("timestamp", raw))
}

fn parse_date(s: &str) -> Option<Date> {
    Date::parse(s, DATE).ok()
}

fn parse_time(s: &str) -> Option<Time> {
    Time::parse(s, TIME).ok()
}

/// Split trailing `+hh[:mm[:ss]]` or `-hh[:mm[:ss]]`.
fn split_offset(s: &str) -> (&str, Option<&str>) {
    match s.rfind(['+', '-']) {
        Some(i) => (&s[..i], Some(&s[i..])),
        None => (s, None),
    }
}

fn parse_offset(s: &str) -> Option<UtcOffset> {
    let (sign, hms) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let mut parts = hms.split(':').map(str::parse::<i8>);
    let h = parts.next()?.ok()?;
    let m = parts.next().transpose().ok()?.unwrap_or(0);
    let sec = parts.next().transpose().ok()?.unwrap_or(0);
    if parts.next().is_some() {
        return None;
    }
    UtcOffset::from_hms(sign * h, sign * m, sign * sec).ok()
}

struct Offset(UtcOffset);

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = self.0.as_hms();
        let sign = if self.0.is_negative() { '-' } else { '+' };
        write!(f, "{sign}{:02}:{:02}", h.unsigned_abs(), m.unsigned_abs())?;
        if s != 0 {
            write!(f, ":{:02}", s.unsigned_abs())?;
        }
        Ok(())
    }
}

struct Clock(Time);

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hms = self.0.format(HMS).map_err(|_| fmt::Error)?;
        f.write_str(&hms)?;
        let micro = self.0.microsecond();
        if micro != 0 {
            write!(f, ".{micro:06}")?;
        }
        Ok(())
    }
}

struct Day(Date);

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.format(DATE).map_err(|_| fmt::Error)?)
    }
}

/// ISO text of a temporal [`Value`], as postgres accepts it in a literal.
///
/// Non temporal values are written as empty string.
pub(crate) struct Iso<'a>(pub &'a Value);

impl fmt::Display for Iso<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Date(d) => write!(f, "{}", Day(*d)),
            Value::Time(t) => write!(f, "{}", Clock(*t)),
            Value::TimeTz(t, o) => write!(f, "{}{}", Clock(*t), Offset(*o)),
            Value::Timestamp(ts) => write!(f, "{} {}", Day(ts.date()), Clock(ts.time())),
            Value::TimestampTz(ts) => write!(
                f,
                "{} {}{}",
                Day(ts.date()),
                Clock(ts.time()),
                Offset(ts.offset()),
            ),
            _ => Ok(()),
        }
    }
}

/// Returns the cast suffix of a temporal [`Value`].
pub(crate) fn cast(value: &Value) -> Option<&'static str> {
    match value {
        Value::Date(_) => Some("date"),
        Value::Time(_) => Some("time"),
        Value::TimeTz(..) => Some("time with time zone"),
        Value::Timestamp(_) => Some("timestamp"),
        Value::TimestampTz(_) => Some("timestamp with time zone"),
        _ => None,
    }
}
