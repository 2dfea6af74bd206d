use chrono::{DateTime, Duration, Utc};

/// Default spacing between readings, in minutes
pub const DEFAULT_INTERVAL_MINUTES: u32 = 10;

/// Default window backfilled for a station that has never reported
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("Interval must be at least one minute")]
    Zero,
    #[error("Interval of {0} minutes does not divide the hour")]
    NotHourAligned(u32),
}

/// Fixed spacing between reading slots
///
/// Only divisors of 60 are accepted so that every slot lands on the same
/// minute marks each hour (:00, :10, :20 ... for the default interval).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInterval {
    minutes: u32,
}

impl SlotInterval {
    pub fn new(minutes: u32) -> Result<Self, IntervalError> {
        if minutes == 0 {
            return Err(IntervalError::Zero);
        }
        if 60 % minutes != 0 {
            return Err(IntervalError::NotHourAligned(minutes));
        }
        Ok(Self { minutes })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }

    /// Round a timestamp down to the previous slot boundary
    ///
    /// Seconds and sub-second components are dropped.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let step_secs = i64::from(self.minutes) * 60;
        let excess_secs = ts.timestamp().rem_euclid(step_secs);
        let excess_nanos = i64::from(ts.timestamp_subsec_nanos());
        ts - Duration::seconds(excess_secs) - Duration::nanoseconds(excess_nanos)
    }

    /// Number of whole slots between two timestamps (zero when `to <= from`)
    pub fn slots_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        let elapsed = self.floor(to) - from;
        if elapsed <= Duration::zero() {
            return 0;
        }
        elapsed.num_seconds() / (i64::from(self.minutes) * 60)
    }
}

impl Default for SlotInterval {
    fn default() -> Self {
        Self {
            minutes: DEFAULT_INTERVAL_MINUTES,
        }
    }
}

/// Starting point for a station with no stored readings
///
/// Bounds the first backfill to `lookback` worth of slots instead of an
/// unbounded history. The result is rounded down to a slot boundary, so a
/// lookback that is not a whole number of intervals still starts on the grid.
pub fn synthetic_start(
    now: DateTime<Utc>,
    lookback: Duration,
    interval: SlotInterval,
) -> DateTime<Utc> {
    interval.floor(interval.floor(now) - lookback)
}

/// Every slot strictly after `last` and up to and including `now` rounded
/// down to the interval, in chronological order
///
/// Slots are spaced from `last`, so resuming with the final element of a
/// previous call and a later `now` continues without gap or overlap.
pub fn missing_slots(
    last: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: SlotInterval,
) -> Vec<DateTime<Utc>> {
    let end = interval.floor(now);
    let step = interval.duration();

    let mut slots = Vec::new();
    let mut next = last + step;
    while next <= end {
        slots.push(next);
        next += step;
    }
    slots
}
