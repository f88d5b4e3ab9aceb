use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::ScheduleError;
use crate::triggers::Trigger;

/// Fires on a cron expression, evaluated in UTC.
///
/// Five-field expressions get a leading seconds field of `0`, so every run
/// lands on the start of a minute. Shorthands such as `@daily` are accepted.
#[derive(Debug, Clone)]
pub struct CronExpressionTrigger {
    schedule: Schedule,
}

impl CronExpressionTrigger {
    pub fn new(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let normalized = if expression.starts_with('@')
            || expression.split_whitespace().count() != 5
        {
            expression.to_string()
        } else {
            format!("0 {expression}")
        };
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| ScheduleError::invalid(expression, e.to_string()))?;
        Ok(Self { schedule })
    }
}

impl Trigger for CronExpressionTrigger {
    fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn every_minute_rounds_to_next_minute() {
        let trigger = CronExpressionTrigger::new("* * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 7, 12).unwrap();
        let next = trigger.next_run(now).unwrap();
        assert!(next > now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 10, 8, 0).unwrap());
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn strictly_after_on_boundary() {
        let trigger = CronExpressionTrigger::new("* * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 8, 0).unwrap();
        assert_eq!(
            trigger.next_run(now),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 9, 0).unwrap())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            CronExpressionTrigger::new("61 * * * *"),
            Err(ScheduleError::Invalid { .. })
        ));
    }
}
