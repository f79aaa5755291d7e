//! Decides whether a cron expression fires at a given minute.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::SchedError;

/// Parse a cron expression, accepting both the classic 5-field crontab form
/// (min hour dom month dow) and the 6/7-field form with a leading seconds
/// field. 5-field expressions are normalized by prepending `0` so they fire
/// at the top of the matching minute.
pub fn parse(expr: &str) -> Result<cron::Schedule, SchedError> {
    cron::Schedule::from_str(&normalize(expr)).map_err(|e| SchedError::InvalidCronExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

fn normalize(expr: &str) -> Cow<'_, str> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {trimmed}"))
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// True when `at`, truncated to the whole minute, is the exact next firing
/// instant of `expr` in `tz` evaluated from one second before the minute.
///
/// Comparing against the computed next-fire instant (rather than matching the
/// minute's fields directly) keeps calendar-aware semantics like day-of-week
/// and month lengths with the `cron` crate as the single source of truth.
///
/// Malformed expressions are never due; the parse failure is logged here so a
/// buggy schedule is visible without crashing the tick loop.
pub fn is_due(expr: &str, tz: Tz, at: DateTime<Utc>) -> bool {
    let schedule = match parse(expr) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable schedule treated as never due");
            return false;
        }
    };

    let local = minute_floor(at).with_timezone(&tz);
    let probe = local - chrono::Duration::seconds(1);
    match schedule.after(&probe).next() {
        Some(next) => {
            next.minute() == local.minute()
                && next.hour() == local.hour()
                && next.day() == local.day()
                && next.month() == local.month()
                && next.year() == local.year()
        }
        None => false,
    }
}

/// Truncate a timestamp to its minute boundary.
pub fn minute_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(at)
}
