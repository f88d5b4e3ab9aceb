use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ScheduleError;
use crate::triggers::Trigger;

/// Fires every `interval`, counted from the reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTrigger {
    interval: Duration,
}

impl PeriodicTrigger {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Trigger for PeriodicTrigger {
    fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = chrono::Duration::from_std(self.interval).ok()?;
        now.checked_add_signed(step)
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Parses a recurring interval.
///
/// Accepts plain seconds (`"90"`), ISO-8601 durations (`"PT1M30S"`, `"P1D"`)
/// and relative strings (`"+1 hour"`, `"1 minute 30 seconds"`, `"2 weeks"`).
/// Years and months count as 365 and 30 days.
pub fn parse_interval(raw: &str) -> Result<Duration, ScheduleError> {
    let raw = raw.trim();
    let secs = if let Ok(secs) = raw.parse::<u64>() {
        secs
    } else if raw.starts_with('P') || raw.starts_with('p') {
        parse_iso_duration(raw)?
    } else {
        parse_relative(raw)?
    };
    if secs == 0 {
        return Err(ScheduleError::ZeroInterval {
            schedule: raw.to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_iso_duration(raw: &str) -> Result<u64, ScheduleError> {
    let body = &raw[1..];
    if body.is_empty() {
        return Err(ScheduleError::invalid(raw, "empty duration"));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut in_time = false;
    for c in body.chars() {
        match c.to_ascii_uppercase() {
            '0'..='9' => digits.push(c),
            'T' if !in_time && digits.is_empty() => in_time = true,
            unit => {
                let n: u64 = digits
                    .parse()
                    .map_err(|_| ScheduleError::invalid(raw, format!("missing number before '{c}'")))?;
                let scale = match (in_time, unit) {
                    (false, 'Y') => 365 * DAY,
                    (false, 'M') => 30 * DAY,
                    (false, 'W') => WEEK,
                    (false, 'D') => DAY,
                    (true, 'H') => HOUR,
                    (true, 'M') => MINUTE,
                    (true, 'S') => 1,
                    _ => return Err(ScheduleError::invalid(raw, format!("unexpected '{c}'"))),
                };
                total = total.saturating_add(n.saturating_mul(scale));
                digits.clear();
            }
        }
    }
    if !digits.is_empty() {
        return Err(ScheduleError::invalid(raw, "number without unit"));
    }
    Ok(total)
}

fn parse_relative(raw: &str) -> Result<u64, ScheduleError> {
    let text = raw.strip_prefix('+').unwrap_or(raw).trim();
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ScheduleError::invalid(raw, "empty interval"));
    }

    let mut total: u64 = 0;
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        let (n, unit) = match token.parse::<u64>() {
            Ok(n) => {
                let unit = iter
                    .next()
                    .ok_or_else(|| ScheduleError::invalid(raw, "number without unit"))?;
                (n, *unit)
            }
            // "hour" alone reads as "1 hour"
            Err(_) => (1, *token),
        };
        let scale = unit_seconds(unit)
            .ok_or_else(|| ScheduleError::invalid(raw, format!("unknown unit '{unit}'")))?;
        total = total.saturating_add(n.saturating_mul(scale));
    }
    Ok(total)
}

fn unit_seconds(unit: &str) -> Option<u64> {
    let unit = unit.trim_start_matches('+').to_ascii_lowercase();
    let secs = match unit.as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hour" | "hours" => HOUR,
        "day" | "days" => DAY,
        "week" | "weeks" => WEEK,
        "month" | "months" => 30 * DAY,
        "year" | "years" => 365 * DAY,
        _ => return None,
    };
    Some(secs)
}
