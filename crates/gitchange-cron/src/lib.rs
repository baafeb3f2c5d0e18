//! Schedule parsing and next-fire computation.
//!
//! Accepted grammar:
//!
//! - 5-field POSIX cron (`minute hour day-of-month month day-of-week`) with
//!   `*`, `a-b`, `a/b` and `a,b` in each field; day-of-week numerals 0-7 with
//!   both 0 and 7 meaning Sunday
//! - `@yearly`/`@annually`, `@monthly`, `@weekly`, `@daily`, `@hourly`
//! - `@every <duration>` where the duration is a positive sum of
//!   `<n>(ns|us|µs|ms|s|m|h)` components, fractions allowed
//!
//! All computation happens in UTC and `next_after(t)` is strictly greater
//! than `t`. Invalid expressions fail at parse time so admission can reject
//! them before any Git work happens.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A parse failure; the expression never becomes a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid schedule {expr:?}: {reason}")]
pub struct CronError {
    pub expr: String,
    pub reason: String,
}

/// A parsed schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Field-based cron schedule.
    Cron(cron::Schedule),
    /// Fixed interval measured from the reference instant.
    Every(Duration),
}

impl Schedule {
    /// Parse a schedule expression.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let invalid = |reason: String| CronError {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }

        if let Some(rest) = trimmed.strip_prefix("@every") {
            if !rest.starts_with(char::is_whitespace) {
                return Err(invalid("expected a duration after @every".to_string()));
            }
            let duration = parse_go_duration(rest.trim()).map_err(invalid)?;
            return Ok(Schedule::Every(duration));
        }

        let five = match trimmed {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            s if s.starts_with('@') => {
                return Err(invalid(format!("unknown descriptor {s:?}")));
            }
            s => s,
        };

        let fields: Vec<&str> = five.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!(
                "expected 5 fields, found {}",
                fields.len()
            )));
        }

        let dow = map_dow_field(fields[4]).map_err(invalid)?;
        // The underlying crate wants a seconds field and names its numeric
        // day-of-week differently, so pin seconds to 0 and pass days by name.
        let full = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], dow
        );
        cron::Schedule::from_str(&full)
            .map(Schedule::Cron)
            .map_err(|e| invalid(e.to_string()))
    }

    /// The first fire time strictly after `after`, or `None` when the
    /// schedule can never fire again (for example an impossible date).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(schedule) => schedule.after(&after).next(),
            Schedule::Every(interval) => {
                let delta = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(delta)
            }
        }
    }
}

/// Validate an expression without keeping the schedule.
pub fn validate(expr: &str) -> Result<(), CronError> {
    Schedule::parse(expr).map(|_| ())
}

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn map_dow_field(field: &str) -> Result<String, String> {
    if field == "*" {
        return Ok(field.to_string());
    }
    let parts: Vec<String> = field
        .split(',')
        .map(map_dow_part)
        .collect::<Result<_, _>>()?;
    Ok(parts.join(","))
}

fn map_dow_part(part: &str) -> Result<String, String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };
    let mapped = if range == "*" {
        range.to_string()
    } else {
        range
            .split('-')
            .map(map_dow_value)
            .collect::<Result<Vec<_>, _>>()?
            .join("-")
    };
    Ok(match step {
        Some(step) => format!("{mapped}/{step}"),
        None => mapped,
    })
}

fn map_dow_value(value: &str) -> Result<String, String> {
    match value.parse::<u8>() {
        // 7 is an accepted alias for Sunday.
        Ok(n) if n <= 7 => Ok(DOW_NAMES[(n % 7) as usize].to_string()),
        Ok(n) => Err(format!("day-of-week {n} out of range")),
        Err(_) => Ok(value.to_string()),
    }
}

fn parse_go_duration(src: &str) -> Result<Duration, String> {
    if src.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_nanos = 0.0_f64;
    let mut rest = src;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("expected a number at {rest:?}"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("bad number {:?}", &rest[..number_len]))?;
        rest = &rest[number_len..];

        let units: [(&str, f64); 8] = [
            ("ns", 1.0),
            ("us", 1e3),
            ("µs", 1e3),
            ("μs", 1e3),
            ("ms", 1e6),
            ("s", 1e9),
            ("m", 6e10),
            ("h", 3.6e12),
        ];
        let Some((unit, nanos)) = units.iter().find(|(u, _)| rest.starts_with(u)) else {
            return Err(format!("missing or unknown unit at {rest:?}"));
        };
        rest = &rest[unit.len()..];
        total_nanos += number * nanos;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err("duration out of range".to_string());
    }
    if total_nanos <= 0.0 {
        return Err("duration must be positive".to_string());
    }
    Ok(Duration::from_nanos(total_nanos as u64))
}
