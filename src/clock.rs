use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::types::TimeStamp;

/// Source of "now" for timestamp stamping.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    nanos: AtomicI64,
}

impl FixedClock {
    pub fn at(start: TimeStamp<Utc>) -> Self {
        Self {
            nanos: AtomicI64::new(start.to_datetime_utc().timestamp_nanos_opt().unwrap_or(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = by.num_nanoseconds().unwrap_or(i64::MAX);
        self.nanos.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> TimeStamp<Utc> {
        DateTime::from_timestamp_nanos(self.nanos.load(Ordering::SeqCst)).into()
    }
}
