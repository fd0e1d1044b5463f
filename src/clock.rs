use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// Source of "now" and of the civil timezone used for date boundaries.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn timezone(&self) -> FixedOffset;

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.timezone()).date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: FixedOffset,
}

impl SystemClock {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> FixedOffset {
        self.tz
    }
}

/// Instant at which `date` starts in the civil timezone.
pub fn start_of_day(date: NaiveDate, tz: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(tz.local_minus_utc()))))
}

#[cfg(test)]
pub use manual::ManualClock;
