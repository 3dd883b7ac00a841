use std::collections::HashMap;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::sync::OnceLock;

use cadence_core::Locked;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::interval::Interval;

/// A calendar-aware span: months and years are not a fixed number of
/// nanoseconds, so adding a `Period` to an instant goes through the
/// Gregorian calendar (UTC) rather than plain arithmetic.
///
/// Parses human text:
///
/// ```
/// use cadence_scheduler::Period;
///
/// let p: Period = "two days and 3 hours".parse().unwrap();
/// assert_eq!(p.days, 2);
/// assert_eq!(p.hours, 3);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Period {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

/// How far [`Period::tidied`] carries overflowing components upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TideLevel {
    Day,
    Hour,
    Minute,
    Second,
    Nanosecond,
}

const BUILTIN_QUANTIFIERS: [(&str, i64); 12] = [
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
];

fn quantifiers() -> &'static Locked<HashMap<String, i64>> {
    static QUANTIFIERS: OnceLock<Locked<HashMap<String, i64>>> = OnceLock::new();
    QUANTIFIERS.get_or_init(|| {
        Locked::new(
            BUILTIN_QUANTIFIERS
                .iter()
                .map(|(w, n)| (w.to_string(), *n))
                .collect(),
        )
    })
}

impl Period {
    pub fn years(n: i64) -> Self {
        Self {
            years: n,
            ..Self::default()
        }
    }

    pub fn months(n: i64) -> Self {
        Self {
            months: n,
            ..Self::default()
        }
    }

    pub fn days(n: i64) -> Self {
        Self {
            days: n,
            ..Self::default()
        }
    }

    pub fn hours(n: i64) -> Self {
        Self {
            hours: n,
            ..Self::default()
        }
    }

    pub fn minutes(n: i64) -> Self {
        Self {
            minutes: n,
            ..Self::default()
        }
    }

    pub fn seconds(n: i64) -> Self {
        Self {
            seconds: n,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Register a word the parser should read as a number, process-wide.
    /// Re-registering a word replaces its value.
    pub fn register_quantifier(word: &str, number: i64) {
        let word = word.trim().to_lowercase();
        debug!(%word, number, "period quantifier registered");
        quantifiers().write(|q| {
            q.insert(word, number);
        });
    }

    /// Carry overflowing sub-components upwards until `level`
    /// (e.g. 90 minutes → 1 hour 30 minutes). Months and years are never
    /// touched since their length depends on the calendar.
    pub fn tidied(self, level: TideLevel) -> Self {
        let mut p = self;
        if level == TideLevel::Nanosecond {
            return p;
        }

        let per_sec = Interval::seconds(1).as_nanos();
        p.seconds = p.seconds.saturating_add(p.nanoseconds / per_sec);
        p.nanoseconds %= per_sec;
        if level == TideLevel::Second {
            return p;
        }

        p.minutes = p.minutes.saturating_add(p.seconds / 60);
        p.seconds %= 60;
        if level == TideLevel::Minute {
            return p;
        }

        p.hours = p.hours.saturating_add(p.minutes / 60);
        p.minutes %= 60;
        if level == TideLevel::Hour {
            return p;
        }

        p.days = p.days.saturating_add(p.hours / 24);
        p.hours %= 24;
        p
    }

    /// `instant + self` on the Gregorian calendar. Months are applied first
    /// (clamping to the last day of shorter months), then the fixed-length
    /// components. `None` when the result is unrepresentable.
    pub fn add_to(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let shifted = if months >= 0 {
            instant.checked_add_months(Months::new(u32::try_from(months).ok()?))?
        } else {
            instant.checked_sub_months(Months::new(u32::try_from(months.checked_neg()?).ok()?))?
        };
        self.fixed_part().add_to(shifted)
    }

    fn fixed_part(&self) -> Interval {
        Interval::days(self.days)
            + Interval::hours(self.hours)
            + Interval::minutes(self.minutes)
            + Interval::seconds(self.seconds)
            + Interval::nanoseconds(self.nanoseconds)
    }

    fn apply_unit(&mut self, number: i64, unit: &str) {
        match unit {
            "year" => self.years = self.years.saturating_add(number),
            "month" => self.months = self.months.saturating_add(number),
            "week" => self.days = self.days.saturating_add(number.saturating_mul(7)),
            "day" => self.days = self.days.saturating_add(number),
            "hour" => self.hours = self.hours.saturating_add(number),
            "minute" => self.minutes = self.minutes.saturating_add(number),
            "second" => self.seconds = self.seconds.saturating_add(number),
            "nanosecond" => self.nanoseconds = self.nanoseconds.saturating_add(number),
            _ => {}
        }
    }
}

impl Add for Period {
    type Output = Period;

    fn add(self, rhs: Period) -> Period {
        Period {
            years: self.years.saturating_add(rhs.years),
            months: self.months.saturating_add(rhs.months),
            days: self.days.saturating_add(rhs.days),
            hours: self.hours.saturating_add(rhs.hours),
            minutes: self.minutes.saturating_add(rhs.minutes),
            seconds: self.seconds.saturating_add(rhs.seconds),
            nanoseconds: self.nanoseconds.saturating_add(rhs.nanoseconds),
        }
    }
}

impl Add<Interval> for Period {
    type Output = Period;

    fn add(self, rhs: Interval) -> Period {
        Period {
            nanoseconds: self.nanoseconds.saturating_add(rhs.as_nanos()),
            ..self
        }
        .tidied(TideLevel::Day)
    }
}

impl FromStr for Period {
    type Err = SchedulerError;

    /// `"<n> <unit>"` fragments joined by `" and "` or `", "`. Numbers may be
    /// registered quantifier words. A plural `s` is ignored and unknown unit
    /// words contribute nothing, but any fragment that is not exactly two
    /// words with a numeric first word fails the whole parse.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SchedulerError::InvalidPeriod(s.to_string());

        let text = s.trim().to_lowercase().replace(", ", " and ");
        if text.is_empty() {
            return Err(invalid());
        }

        let words = quantifiers().snapshot();
        let mut period = Period::default();
        for fragment in text.split(" and ") {
            let mut tokens = fragment.split_whitespace();
            let (Some(number), Some(unit), None) = (tokens.next(), tokens.next(), tokens.next())
            else {
                return Err(invalid());
            };

            let number = match words.get(number) {
                Some(n) => *n,
                None => number.parse::<i64>().map_err(|_| invalid())?,
            };
            period.apply_unit(number, unit.strip_suffix('s').unwrap_or(unit));
        }
        Ok(period)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.tidied(TideLevel::Day);
        write!(f, "Period:")?;
        let parts = [
            (p.years, "year"),
            (p.months, "month"),
            (p.days, "day"),
            (p.hours, "hour"),
            (p.minutes, "minute"),
            (p.seconds, "second"),
            (p.nanoseconds, "nanosecond"),
        ];
        for (value, unit) in parts.iter().filter(|(v, _)| *v != 0) {
            write!(f, " {value} {unit}(s)")?;
        }
        Ok(())
    }
}
