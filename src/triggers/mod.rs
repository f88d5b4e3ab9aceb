//! # Schedule triggers.
//!
//! A [`Trigger`] maps a reference instant to the next run instant, or `None`
//! when it will never fire again. [`from_schedule`] picks the variant for a raw
//! schedule string:
//!
//! | schedule | trigger |
//! |---|---|
//! | `2030-01-01T00:00:00Z`, `2030-01-01 00:00:00` | [`DateTimeTrigger`] |
//! | `*/5 * * * *`, `@hourly` | [`CronExpressionTrigger`] |
//! | `30`, `PT1M30S`, `+1 hour`, `1 minute 30 seconds` | [`PeriodicTrigger`] |
//!
//! A non-zero jitter wraps the result in a [`JitterTrigger`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ScheduleError;

mod cron;
mod datetime;
mod jitter;
mod periodic;

pub use cron::CronExpressionTrigger;
pub use datetime::DateTimeTrigger;
pub use jitter::JitterTrigger;
pub use periodic::{PeriodicTrigger, parse_interval};

/// Stateless next-run computation.
pub trait Trigger: Send + Sync + 'static {
    /// Next run at or after `now`; `None` means never again.
    fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Source of wall-clock time for the scheduler.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall clock backed by [`Utc::now`].
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Builds the trigger matching a raw schedule string.
pub fn from_schedule(schedule: &str, jitter: Duration) -> Result<Box<dyn Trigger>, ScheduleError> {
    let schedule = schedule.trim();
    if schedule.is_empty() {
        return Err(ScheduleError::Empty);
    }

    let trigger: Box<dyn Trigger> = if let Some(at) = datetime::parse_datetime(schedule) {
        Box::new(DateTimeTrigger::new(at))
    } else if is_cron_expression(schedule) {
        Box::new(CronExpressionTrigger::new(schedule)?)
    } else {
        Box::new(PeriodicTrigger::new(parse_interval(schedule)?))
    };

    if jitter.is_zero() {
        Ok(trigger)
    } else {
        Ok(Box::new(JitterTrigger::new(trigger, jitter)))
    }
}

fn is_cron_expression(schedule: &str) -> bool {
    schedule.starts_with('@')
        || (schedule.split_whitespace().count() == 5 && schedule.contains('*'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn picks_datetime() {
        let trigger = from_schedule("2025-03-01T12:00:00Z", Duration::ZERO).unwrap();
        assert_eq!(trigger.next_run(at(11, 0, 0)), Some(at(12, 0, 0)));
        assert_eq!(trigger.next_run(at(12, 0, 1)), None);
    }

    #[test]
    fn picks_cron() {
        let trigger = from_schedule("*/15 * * * *", Duration::ZERO).unwrap();
        assert_eq!(trigger.next_run(at(10, 7, 12)), Some(at(10, 15, 0)));

        let hourly = from_schedule("@hourly", Duration::ZERO).unwrap();
        assert_eq!(hourly.next_run(at(10, 7, 12)), Some(at(11, 0, 0)));
    }

    #[test]
    fn picks_interval() {
        let trigger = from_schedule("5", Duration::ZERO).unwrap();
        assert_eq!(trigger.next_run(at(10, 0, 0)), Some(at(10, 0, 5)));

        let relative = from_schedule("+1 hour", Duration::ZERO).unwrap();
        assert_eq!(relative.next_run(at(10, 0, 0)), Some(at(11, 0, 0)));
    }

    #[test]
    fn jitter_wraps_result() {
        let trigger = from_schedule("60", Duration::from_secs(10)).unwrap();
        let now = at(10, 0, 0);
        for _ in 0..50 {
            let next = trigger.next_run(now).unwrap();
            assert!(next >= at(10, 1, 0) && next <= at(10, 1, 10));
        }
    }

    #[test]
    fn malformed_schedules_fail() {
        assert_eq!(from_schedule("  ", Duration::ZERO).err(), Some(ScheduleError::Empty));
        assert!(from_schedule("whenever you like", Duration::ZERO).is_err());
        assert!(from_schedule("* * * * 99", Duration::ZERO).is_err());
        assert!(matches!(
            from_schedule("0", Duration::ZERO),
            Err(ScheduleError::ZeroInterval { .. })
        ));
    }
}
