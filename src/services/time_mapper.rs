//! Source-timeline to wall-clock mapping
//!
//! The anchor (the source day that plays as "today") is fixed by the dataset
//! start and the configured offset. Everything else is derived from `now`,
//! so the mapping re-anchors itself at every local midnight.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMapper {
    anchor: DateTime<Utc>,
    timezone: Tz,
}

impl TimeMapper {
    /// `anchor = floor_to_day(min_date + start_offset_days)` on the source calendar.
    pub fn new(min_date: DateTime<Utc>, start_offset_days: u32, timezone: Tz) -> Self {
        let shifted = min_date + Duration::days(i64::from(start_offset_days));
        Self {
            anchor: floor_to_utc_day(shifted),
            timezone,
        }
    }

    /// The source timestamp that maps to local midnight today.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    /// Offset added to every source timestamp at `now`.
    pub fn shift(&self, now: DateTime<Utc>) -> Duration {
        local_midnight(now, self.timezone) - self.anchor
    }

    /// Wall-clock time for a source timestamp.
    pub fn map(&self, original_time: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        original_time + self.shift(now)
    }

    /// Where the replay cursor should be at `now`.
    pub fn expected_source_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.anchor + (now - local_midnight(now, self.timezone))
    }

    /// Positive when `current` lags the expected source time.
    pub fn hours_behind(&self, current: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        duration_hours(self.expected_source_time(now) - current)
    }

    pub fn hours_since_local_midnight(&self, now: DateTime<Utc>) -> f64 {
        duration_hours(now - local_midnight(now, self.timezone))
    }

    /// Whole local hours elapsed today (the local hour-of-day).
    pub fn whole_hours_since_local_midnight(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.timezone).hour()
    }

    /// Next local `HH:00:00` strictly after `now`.
    pub fn next_hour_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_local_hour(now, self.timezone)
    }
}

/// Midnight of `now`'s local calendar day, as a UTC instant.
pub fn local_midnight(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = now.with_timezone(&tz).date_naive();
    start_of_local_day(local_date, tz)
}

fn start_of_local_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight skipped by a DST jump: the day starts at the first valid local time
        LocalResult::None => {
            let mut candidate = midnight;
            loop {
                candidate += Duration::minutes(15);
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
        }
    }
}

fn next_local_hour(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let floored = local.naive_local().date().and_time(chrono::NaiveTime::MIN)
        + Duration::hours(i64::from(local.hour()));
    let mut candidate = floored + Duration::hours(1);
    loop {
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            let dt = dt.with_timezone(&Utc);
            if dt > now {
                return dt;
            }
        }
        candidate += Duration::hours(1);
    }
}

pub fn floor_to_utc_day(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

pub fn duration_hours(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 3_600_000.0
}
