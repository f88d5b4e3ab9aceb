use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::policies::JitterPolicy;
use crate::triggers::Trigger;

/// Adds a uniformly random delay in `[0, jitter]` to another trigger.
pub struct JitterTrigger {
    inner: Box<dyn Trigger>,
    jitter: Duration,
}

impl JitterTrigger {
    pub fn new(inner: Box<dyn Trigger>, jitter: Duration) -> Self {
        Self { inner, jitter }
    }
}

impl Trigger for JitterTrigger {
    fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.inner.next_run(now)?;
        let offset = JitterPolicy::Full.apply(self.jitter);
        match chrono::Duration::from_std(offset) {
            Ok(offset) => Some(next + offset),
            Err(_) => Some(next),
        }
    }
}
