use chrono::{DateTime, NaiveDateTime, Utc};

use crate::triggers::Trigger;

/// Fires once at a fixed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTimeTrigger {
    at: DateTime<Utc>,
}

impl DateTimeTrigger {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Trigger for DateTimeTrigger {
    fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.at > now).then_some(self.at)
    }
}

/// Parses an RFC 3339 instant, or a naive date-time read as UTC.
pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offsets_are_normalized() {
        let at = parse_datetime("2025-03-01T12:00:00+02:00").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(
            parse_datetime("2025-03-01 12:00:00"),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("60"), None);
        assert_eq!(parse_datetime("PT1M"), None);
    }
}
