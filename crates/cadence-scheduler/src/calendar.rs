//! Calendar matchers: time of day, weekdays, and month-days.
//!
//! All calendar math is Gregorian in UTC. A matcher turns an anchor instant
//! into the start of the next matching day: the anchor's own day when it
//! already matches, otherwise the next occurrence.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Month, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

use crate::error::{Result, SchedulerError};
use crate::interval::Interval;

/// A wall-clock time within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
    second: u32,
    nanosecond: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32, second: u32, nanosecond: u32) -> Result<Self> {
        if hour >= 24 || minute >= 60 || second >= 60 || nanosecond >= 1_000_000_000 {
            return Err(SchedulerError::InvalidTimeOfDay(format!(
                "{hour}:{minute}:{second}.{nanosecond}"
            )));
        }
        Ok(Self {
            hour,
            minute,
            second,
            nanosecond,
        })
    }

    pub fn hm(hour: u32, minute: u32) -> Result<Self> {
        Self::new(hour, minute, 0, 0)
    }

    /// `[hour, minute?, second?, nanosecond?]`; missing parts are zero.
    pub fn from_parts(parts: &[u32]) -> Result<Self> {
        let part = |i: usize| parts.get(i).copied().unwrap_or(0);
        match parts.len() {
            1..=4 => Self::new(part(0), part(1), part(2), part(3)),
            _ => Err(SchedulerError::InvalidTimeOfDay(format!("{parts:?}"))),
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn second(&self) -> u32 {
        self.second
    }

    pub fn nanosecond(&self) -> u32 {
        self.nanosecond
    }

    pub fn since_start_of_day(&self) -> Interval {
        Interval::hours(i64::from(self.hour))
            + Interval::minutes(i64::from(self.minute))
            + Interval::seconds(i64::from(self.second))
            + Interval::nanoseconds(i64::from(self.nanosecond))
    }
}

fn parse_component(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `"250"` → 250_000_000 ns. At most millisecond precision.
fn parse_fraction(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{s:0<9}");
    padded.parse().ok()
}

impl FromStr for TimeOfDay {
    type Err = SchedulerError;

    /// `H`, `H:MM`, `H:MM:SS` or `H:MM:SS.fff`, each optionally followed by
    /// ` am` / ` pm`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SchedulerError::InvalidTimeOfDay(s.to_string());

        let text = s.trim();
        let lower = text.to_ascii_lowercase();
        let (clock, meridiem) = match lower.rsplit_once(' ') {
            Some((clock, m @ ("am" | "pm"))) => (clock.to_string(), Some(m.to_string())),
            Some(_) => return Err(invalid()),
            None => (lower.clone(), None),
        };

        let mut fields = clock.split(':');
        let mut hour = fields.next().and_then(parse_component).ok_or_else(invalid)?;
        let minute = match fields.next() {
            Some(m) => parse_component(m).ok_or_else(invalid)?,
            None => 0,
        };
        let (second, nanosecond) = match fields.next() {
            Some(sec) => match sec.split_once('.') {
                Some((whole, frac)) => (
                    parse_component(whole).ok_or_else(invalid)?,
                    parse_fraction(frac).ok_or_else(invalid)?,
                ),
                None => (parse_component(sec).ok_or_else(invalid)?, 0),
            },
            None => (0, 0),
        };
        if fields.next().is_some() {
            return Err(invalid());
        }

        match meridiem.as_deref() {
            Some("am") if hour == 12 => hour = 0,
            Some("pm") if hour < 12 => hour += 12,
            _ => {}
        }

        Self::new(hour, minute, second, nanosecond).map_err(|_| invalid())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            self.hour,
            self.minute,
            self.second,
            self.nanosecond / 1_000_000
        )
    }
}

/// A day of the year, e.g. April 1st. February 29th is allowed and only
/// matches in leap years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    pub fn new(month: Month, day: u32) -> Result<Self> {
        Self::from_numbers(month.number_from_month(), day)
    }

    /// `month` is 1-based.
    pub fn from_numbers(month: u32, day: u32) -> Result<Self> {
        // 2024 is a leap year, so every month-day that exists at all exists here.
        if NaiveDate::from_ymd_opt(2024, month, day).is_none() {
            return Err(SchedulerError::InvalidMonthDay { month, day });
        }
        Ok(Self { month, day })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        instant.month() == self.month && instant.day() == self.day
    }

    fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }

    /// First date on or after `from` with this month-day.
    fn on_or_after(&self, from: NaiveDate) -> Option<NaiveDate> {
        // A valid month-day recurs at least every 8 years (Feb 29 across a
        // skipped centennial leap year).
        (0..=8)
            .filter_map(|offset| self.in_year(from.year().checked_add(offset)?))
            .find(|date| *date >= from)
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("?");
        let suffix = match (self.day % 10, self.day % 100) {
            (_, 11..=13) => "th",
            (1, _) => "st",
            (2, _) => "nd",
            (3, _) => "rd",
            _ => "th",
        };
        write!(f, "{name} {}{suffix}", self.day)
    }
}

pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Start of the first day on or after `anchor`'s day that falls on `weekday`.
pub fn next_weekday(anchor: DateTime<Utc>, weekday: Weekday) -> Option<DateTime<Utc>> {
    let today = anchor.date_naive();
    let ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    today
        .checked_add_days(Days::new(u64::from(ahead)))
        .map(start_of_day)
}

/// Start of the first day on or after `anchor`'s day that is `month_day`.
pub fn next_month_day(anchor: DateTime<Utc>, month_day: MonthDay) -> Option<DateTime<Utc>> {
    month_day.on_or_after(anchor.date_naive()).map(start_of_day)
}

/// Every `weekday`, starting today when today matches.
#[derive(Debug, Clone)]
pub struct WeekdayDates {
    next: Option<NaiveDate>,
}

impl WeekdayDates {
    pub fn new(anchor: DateTime<Utc>, weekday: Weekday) -> Self {
        Self {
            next: next_weekday(anchor, weekday).map(|d| d.date_naive()),
        }
    }
}

impl Iterator for WeekdayDates {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        let current = self.next?;
        self.next = current.checked_add_days(Days::new(7));
        Some(start_of_day(current))
    }
}

/// Every occurrence of `month_day`, starting today when today matches.
#[derive(Debug, Clone)]
pub struct MonthDayDates {
    month_day: MonthDay,
    next: Option<NaiveDate>,
}

impl MonthDayDates {
    pub fn new(anchor: DateTime<Utc>, month_day: MonthDay) -> Self {
        Self {
            month_day,
            next: month_day.on_or_after(anchor.date_naive()),
        }
    }
}

impl Iterator for MonthDayDates {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        let current = self.next?;
        self.next = current
            .with_day(1)
            .and_then(|d| d.with_month(1))
            .and_then(|d| d.with_year(d.year().checked_add(1)?))
            .and_then(|jan1| self.month_day.on_or_after(jan1));
        Some(start_of_day(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn time_of_day_parsing() {
        let t: TimeOfDay = "9".parse().unwrap();
        assert_eq!(t, TimeOfDay::hm(9, 0).unwrap());

        let t: TimeOfDay = "21:30:15".parse().unwrap();
        assert_eq!((t.hour(), t.minute(), t.second()), (21, 30, 15));

        let t: TimeOfDay = "7:05:01.25".parse().unwrap();
        assert_eq!(t.nanosecond(), 250_000_000);

        let t: TimeOfDay = "9:30 pm".parse().unwrap();
        assert_eq!(t, TimeOfDay::hm(21, 30).unwrap());

        let t: TimeOfDay = "12 AM".parse().unwrap();
        assert_eq!(t.hour(), 0);

        let t: TimeOfDay = "12:15 pm".parse().unwrap();
        assert_eq!(t.hour(), 12);
    }

    #[test]
    fn time_of_day_rejects_garbage() {
        for bad in [
            "", "24", "9:60", "9:00:60", "9:00:00.1234", "noon", "9 at", "123:00", "1:2:3:4",
        ] {
            assert!(bad.parse::<TimeOfDay>().is_err(), "{bad:?} should not parse");
        }
        assert!(TimeOfDay::from_parts(&[]).is_err());
        assert!(TimeOfDay::from_parts(&[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn time_of_day_offset_and_display() {
        let t = TimeOfDay::from_parts(&[9, 30]).unwrap();
        assert_eq!(t.since_start_of_day(), Interval::minutes(9 * 60 + 30));
        assert_eq!(t.to_string(), "09:30:00.000");
    }

    #[test]
    fn weekday_matcher_today_or_next() {
        // 2024-01-01 is a Monday
        let monday_noon = utc(2024, 1, 1, 12, 0);
        assert_eq!(next_weekday(monday_noon, Weekday::Mon), Some(utc(2024, 1, 1, 0, 0)));
        assert_eq!(next_weekday(monday_noon, Weekday::Wed), Some(utc(2024, 1, 3, 0, 0)));
        assert_eq!(next_weekday(monday_noon, Weekday::Sun), Some(utc(2024, 1, 7, 0, 0)));
    }

    #[test]
    fn weekday_dates_step_a_week() {
        let dates: Vec<_> = WeekdayDates::new(utc(2024, 1, 1, 12, 0), Weekday::Fri)
            .take(3)
            .collect();
        assert_eq!(
            dates,
            vec![utc(2024, 1, 5, 0, 0), utc(2024, 1, 12, 0, 0), utc(2024, 1, 19, 0, 0)]
        );
    }

    #[test]
    fn month_day_validation() {
        assert!(MonthDay::new(Month::February, 29).is_ok());
        assert_eq!(
            MonthDay::from_numbers(4, 31),
            Err(SchedulerError::InvalidMonthDay { month: 4, day: 31 })
        );
        assert!(MonthDay::from_numbers(13, 1).is_err());
        assert!(MonthDay::from_numbers(1, 0).is_err());
    }

    #[test]
    fn month_day_matcher() {
        let april_fools = MonthDay::new(Month::April, 1).unwrap();
        assert!(april_fools.matches(utc(2030, 4, 1, 23, 59)));
        assert!(!april_fools.matches(utc(2030, 4, 2, 0, 0)));

        assert_eq!(next_month_day(utc(2024, 4, 1, 9, 0), april_fools), Some(utc(2024, 4, 1, 0, 0)));
        assert_eq!(next_month_day(utc(2024, 4, 2, 0, 0), april_fools), Some(utc(2025, 4, 1, 0, 0)));
    }

    #[test]
    fn leap_day_dates_skip_common_years() {
        let leap = MonthDay::new(Month::February, 29).unwrap();
        let dates: Vec<_> = MonthDayDates::new(utc(2023, 6, 1, 0, 0), leap).take(3).collect();
        assert_eq!(
            dates,
            vec![utc(2024, 2, 29, 0, 0), utc(2028, 2, 29, 0, 0), utc(2032, 2, 29, 0, 0)]
        );

        let dates: Vec<_> = MonthDayDates::new(utc(2096, 3, 1, 0, 0), leap).take(1).collect();
        assert_eq!(dates, vec![utc(2104, 2, 29, 0, 0)]);
    }

    #[test]
    fn month_day_display() {
        assert_eq!(MonthDay::new(Month::April, 1).unwrap().to_string(), "April 1st");
        assert_eq!(MonthDay::new(Month::March, 12).unwrap().to_string(), "March 12th");
        assert_eq!(MonthDay::new(Month::May, 23).unwrap().to_string(), "May 23rd");
    }
}
