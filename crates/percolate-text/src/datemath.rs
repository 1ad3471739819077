//! Date parsing and relative date math (`now-1d/d`, `2015-07-21||+1M`).
//!
//! `now` always refers to the start time captured for the percolate request,
//! never to the wall clock at evaluation time.
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid date math expression [{expr}]: {reason}")]
pub struct DateMathError {
    pub expr: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl Unit {
    fn parse(c: char) -> Option<Self> {
        match c {
            'y' => Some(Unit::Year),
            'M' => Some(Unit::Month),
            'w' => Some(Unit::Week),
            'd' => Some(Unit::Day),
            'h' | 'H' => Some(Unit::Hour),
            'm' => Some(Unit::Minute),
            's' => Some(Unit::Second),
            _ => None,
        }
    }
}

/// True when the expression needs an anchor other than a literal date.
pub fn is_date_math(expr: &str) -> bool { expr.starts_with("now") || expr.contains("||") }

/// Parse a literal date: RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS`, or epoch millis.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) { return Some(dt.with_timezone(&Utc)); }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") { return Some(Utc.from_utc_datetime(&ndt)); }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") { return d.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt)); }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        return s.parse::<i64>().ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    }
    None
}

/// Millis since epoch for a document value, if it looks like a date.
pub fn value_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => parse_date(s).map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

/// Resolve an expression to epoch millis. `round_up` makes `/unit` rounding
/// land on the last millisecond of the unit (used by `gt` and `lte`).
pub fn resolve(expr: &str, now: DateTime<Utc>, round_up: bool) -> Result<i64, DateMathError> {
    let fail = |reason: &str| DateMathError { expr: expr.to_string(), reason: reason.to_string() };
    let (anchor, math) = if let Some(rest) = expr.strip_prefix("now") {
        (now, rest)
    } else if let Some((date, rest)) = expr.split_once("||") {
        (parse_date(date).ok_or_else(|| fail("unparseable anchor date"))?, rest)
    } else {
        return parse_date(expr).map(|dt| dt.timestamp_millis()).ok_or_else(|| fail("unparseable date"));
    };

    let mut at = anchor;
    let mut chars = math.chars().peekable();
    while let Some(op) = chars.next() {
        match op {
            '/' => {
                let unit = chars.next().and_then(Unit::parse).ok_or_else(|| fail("missing rounding unit"))?;
                at = round(at, unit, round_up).ok_or_else(|| fail("rounding out of range"))?;
            }
            '+' | '-' => {
                let mut digits = String::new();
                while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) { digits.push(c); chars.next(); }
                let amount: i64 = if digits.is_empty() { 1 } else { digits.parse().map_err(|_| fail("amount out of range"))? };
                let unit = chars.next().and_then(Unit::parse).ok_or_else(|| fail("unknown unit"))?;
                let amount = if op == '-' { -amount } else { amount };
                at = shift(at, amount, unit).ok_or_else(|| fail("arithmetic out of range"))?;
            }
            _ => return Err(fail("expected one of '+', '-', '/'")),
        }
    }
    Ok(at.timestamp_millis())
}

fn shift(at: DateTime<Utc>, amount: i64, unit: Unit) -> Option<DateTime<Utc>> {
    let months = |n: i64| -> Option<DateTime<Utc>> {
        let m = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
        if n >= 0 { at.checked_add_months(m) } else { at.checked_sub_months(m) }
    };
    let seconds = |factor: i64| -> Option<DateTime<Utc>> { at.checked_add_signed(TimeDelta::try_seconds(amount.checked_mul(factor)?)?) };
    match unit {
        Unit::Year => months(amount.checked_mul(12)?),
        Unit::Month => months(amount),
        Unit::Week => seconds(7 * 86_400),
        Unit::Day => seconds(86_400),
        Unit::Hour => seconds(3_600),
        Unit::Minute => seconds(60),
        Unit::Second => seconds(1),
    }
}

fn round(at: DateTime<Utc>, unit: Unit, round_up: bool) -> Option<DateTime<Utc>> {
    let date = at.date_naive();
    let start = match unit {
        Unit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
        Unit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)?,
        Unit::Week => date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))?.and_hms_opt(0, 0, 0)?,
        Unit::Day => date.and_hms_opt(0, 0, 0)?,
        Unit::Hour => date.and_hms_opt(at.hour(), 0, 0)?,
        Unit::Minute => date.and_hms_opt(at.hour(), at.minute(), 0)?,
        Unit::Second => date.and_hms_opt(at.hour(), at.minute(), at.second())?,
    };
    let start = Utc.from_utc_datetime(&start);
    if !round_up { return Some(start); }
    shift(start, 1, unit)?.checked_sub_signed(TimeDelta::try_milliseconds(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> { parse_date("2016-01-15T12:30:45Z").expect("now") }

    #[test]
    fn now_with_offsets() {
        let base = now().timestamp_millis();
        assert_eq!(resolve("now", now(), false), Ok(base));
        assert_eq!(resolve("now+1d", now(), false), Ok(base + 86_400_000));
        assert_eq!(resolve("now-2h", now(), false), Ok(base - 2 * 3_600_000));
        assert_eq!(resolve("now+90d", now(), false), Ok(base + 90 * 86_400_000));
    }

    #[test]
    fn rounding_respects_direction() {
        let down = resolve("now/d", now(), false).expect("down");
        let up = resolve("now/d", now(), true).expect("up");
        assert_eq!(down, parse_date("2016-01-15").expect("day").timestamp_millis());
        assert_eq!(up, down + 86_400_000 - 1);
        let month = resolve("now/M", now(), false).expect("month");
        assert_eq!(month, parse_date("2016-01-01").expect("first").timestamp_millis());
    }

    #[test]
    fn anchored_expressions_and_literals() {
        let anchored = resolve("2015-07-21||+1M", now(), false).expect("anchored");
        assert_eq!(anchored, parse_date("2015-08-21").expect("date").timestamp_millis());
        let literal = resolve("2015-07-21T10:28:01-07:00", now(), false).expect("literal");
        assert_eq!(literal, parse_date("2015-07-21T17:28:01Z").expect("utc").timestamp_millis());
    }

    #[test]
    fn malformed_expressions_fail() {
        assert!(resolve("now+5q", now(), false).is_err());
        assert!(resolve("now*2", now(), false).is_err());
        assert!(resolve("not a date", now(), false).is_err());
    }
}
