use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::calendar::MonthDay;
use crate::error::{Result, SchedulerError};
use crate::interval::Interval;
use crate::schedule::Schedule;

/// A [`Schedule`] as data, e.g. from a config file or a JSON request.
///
/// ```json
/// { "kind": "weekly", "weekdays": ["mon", "thu"], "at": "9:30", "first": 10 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(flatten)]
    pub rule: Rule,
    /// Keep at most this many fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<usize>,
    /// Only fire strictly before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    Never,
    Now,
    After {
        seconds: f64,
    },
    Every {
        seconds: f64,
        /// Initial delay before the first fire; defaults to `seconds`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_seconds: Option<f64>,
    },
    /// Calendar period in words, e.g. `"1 month"`.
    EveryPeriod {
        period: String,
    },
    At {
        instant: DateTime<Utc>,
    },
    Dates {
        instants: Vec<DateTime<Utc>>,
    },
    Weekly {
        weekdays: Vec<Weekday>,
        at: String,
    },
    Yearly {
        days: Vec<YearDay>,
        at: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearDay {
    pub month: u32,
    pub day: u32,
}

impl Plan {
    pub fn new(rule: Rule) -> Self {
        Self {
            rule,
            first: None,
            until: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SchedulerError::InvalidPlan(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SchedulerError::InvalidPlan(e.to_string()))
    }

    /// Build the schedule. Invalid pieces (bad period text, impossible
    /// dates or times) give a schedule that never fires.
    pub fn to_schedule(&self) -> Schedule {
        let mut schedule = self.rule.to_schedule();
        if let Some(n) = self.first {
            schedule = schedule.first(n);
        }
        if let Some(limit) = self.until {
            schedule = schedule.until(limit);
        }
        schedule
    }
}

impl From<Rule> for Plan {
    fn from(rule: Rule) -> Self {
        Self::new(rule)
    }
}

impl Rule {
    fn to_schedule(&self) -> Schedule {
        match self {
            Rule::Never => Schedule::never(),
            Rule::Now => Schedule::now(),
            Rule::After { seconds } => Schedule::after(Interval::from_secs_f64(*seconds)),
            Rule::Every {
                seconds,
                delay_seconds,
            } => {
                let interval = Interval::from_secs_f64(*seconds);
                match delay_seconds {
                    Some(delay) if interval > Interval::ZERO => {
                        Schedule::after_repeating(Interval::from_secs_f64(*delay), interval)
                    }
                    _ => Schedule::every(interval),
                }
            }
            Rule::EveryPeriod { period } => Schedule::every_str(period),
            Rule::At { instant } => Schedule::at(*instant),
            Rule::Dates { instants } => Schedule::of_dates(instants.iter().copied()),
            Rule::Weekly { weekdays, at } => {
                Schedule::every_weekdays(weekdays.iter().copied()).at_str(at)
            }
            Rule::Yearly { days, at } => {
                let parsed: Result<Vec<MonthDay>> = days
                    .iter()
                    .map(|d| MonthDay::from_numbers(d.month, d.day))
                    .collect();
                match parsed {
                    Ok(days) => Schedule::every_month_days(days).at_str(at),
                    Err(e) => {
                        warn!(error = %e, "invalid yearly plan, schedule never fires");
                        Schedule::never()
                    }
                }
            }
        }
    }
}
