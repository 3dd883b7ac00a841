use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;
const NANOS_PER_WEEK: i64 = 7 * NANOS_PER_DAY;

/// A signed span of time with nanosecond resolution.
///
/// This is the unit every recurrence sequence yields: the gap since the
/// previously produced value. A negative interval is the "stop" signal.
/// Arithmetic saturates instead of overflowing (the representable range is
/// roughly ±292 years).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Interval {
    nanos: i64,
}

impl Interval {
    pub const ZERO: Interval = Interval { nanos: 0 };
    pub const MAX: Interval = Interval { nanos: i64::MAX };
    pub const MIN: Interval = Interval { nanos: i64::MIN };

    pub const fn nanoseconds(n: i64) -> Self {
        Self { nanos: n }
    }

    pub const fn microseconds(n: i64) -> Self {
        Self::scaled(n, NANOS_PER_MICRO)
    }

    pub const fn milliseconds(n: i64) -> Self {
        Self::scaled(n, NANOS_PER_MILLI)
    }

    pub const fn seconds(n: i64) -> Self {
        Self::scaled(n, NANOS_PER_SEC)
    }

    pub const fn minutes(n: i64) -> Self {
        Self::scaled(n, NANOS_PER_MINUTE)
    }

    pub const fn hours(n: i64) -> Self {
        Self::scaled(n, NANOS_PER_HOUR)
    }

    pub const fn days(n: i64) -> Self {
        Self::scaled(n, NANOS_PER_DAY)
    }

    pub const fn weeks(n: i64) -> Self {
        Self::scaled(n, NANOS_PER_WEEK)
    }

    /// Fractional seconds; NaN maps to zero and infinities saturate.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_nanos_f64(secs * NANOS_PER_SEC as f64)
    }

    const fn scaled(n: i64, unit: i64) -> Self {
        Self {
            nanos: n.saturating_mul(unit),
        }
    }

    fn from_nanos_f64(nanos: f64) -> Self {
        // `as` saturates at the i64 bounds and maps NaN to 0.
        Self {
            nanos: nanos as i64,
        }
    }

    pub const fn as_nanos(self) -> i64 {
        self.nanos
    }

    pub fn as_micros_f64(self) -> f64 {
        self.nanos as f64 / NANOS_PER_MICRO as f64
    }

    pub fn as_millis_f64(self) -> f64 {
        self.nanos as f64 / NANOS_PER_MILLI as f64
    }

    pub fn as_secs_f64(self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC as f64
    }

    pub fn as_minutes_f64(self) -> f64 {
        self.as_secs_f64() / 60.0
    }

    pub fn as_hours_f64(self) -> f64 {
        self.as_minutes_f64() / 60.0
    }

    pub fn as_days_f64(self) -> f64 {
        self.as_hours_f64() / 24.0
    }

    pub fn as_weeks_f64(self) -> f64 {
        self.as_days_f64() / 7.0
    }

    pub const fn is_negative(self) -> bool {
        self.nanos < 0
    }

    pub const fn is_zero(self) -> bool {
        self.nanos == 0
    }

    pub const fn abs(self) -> Self {
        Self {
            nanos: self.nanos.saturating_abs(),
        }
    }

    /// Scale by a real multiplier.
    pub fn mul_f64(self, multiplier: f64) -> Self {
        Self::from_nanos_f64(self.nanos as f64 * multiplier)
    }

    /// Compares magnitudes, ignoring sign.
    pub fn is_longer_than(self, other: Interval) -> bool {
        self.abs() > other.abs()
    }

    pub fn is_shorter_than(self, other: Interval) -> bool {
        self.abs() < other.abs()
    }

    pub fn to_chrono(self) -> chrono::Duration {
        chrono::Duration::nanoseconds(self.nanos)
    }

    pub fn from_chrono(d: chrono::Duration) -> Self {
        match d.num_nanoseconds() {
            Some(n) => Self::nanoseconds(n),
            None if d < chrono::Duration::zero() => Self::MIN,
            None => Self::MAX,
        }
    }

    /// `None` for negative intervals.
    pub fn to_std(self) -> Option<std::time::Duration> {
        u64::try_from(self.nanos)
            .ok()
            .map(std::time::Duration::from_nanos)
    }

    /// `instant + self`, or `None` if the result is out of chrono's range.
    pub fn add_to(self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        instant.checked_add_signed(self.to_chrono())
    }

    /// `later - earlier`, saturating.
    pub fn between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> Self {
        Self::from_chrono(later.signed_duration_since(earlier))
    }
}

impl From<std::time::Duration> for Interval {
    fn from(d: std::time::Duration) -> Self {
        Self {
            nanos: i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        }
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl Sub for Interval {
    type Output = Interval;

    fn sub(self, rhs: Interval) -> Interval {
        Interval {
            nanos: self.nanos.saturating_sub(rhs.nanos),
        }
    }
}

impl AddAssign for Interval {
    fn add_assign(&mut self, rhs: Interval) {
        *self = *self + rhs;
    }
}

impl SubAssign for Interval {
    fn sub_assign(&mut self, rhs: Interval) {
        *self = *self - rhs;
    }
}

impl Neg for Interval {
    type Output = Interval;

    fn neg(self) -> Interval {
        Interval {
            nanos: self.nanos.saturating_neg(),
        }
    }
}

impl Mul<f64> for Interval {
    type Output = Interval;

    fn mul(self, rhs: f64) -> Interval {
        self.mul_f64(rhs)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} nanosecond(s)", self.nanos)
    }
}
