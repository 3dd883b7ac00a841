use thiserror::Error;

/// Errors from the validating constructors and text parsers.
///
/// The scheduling surface itself never fails: `Schedule` constructors that
/// take text degrade to [`Schedule::never`](crate::Schedule::never) instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The text is not a `<number> <unit>[ and <number> <unit>…]` period.
    #[error("Invalid period: {0:?}")]
    InvalidPeriod(String),

    /// The text or components do not form a valid wall-clock time.
    #[error("Invalid time of day: {0:?}")]
    InvalidTimeOfDay(String),

    /// No calendar year contains this month/day pair.
    #[error("Invalid month day: {month}/{day}")]
    InvalidMonthDay { month: u32, day: u32 },

    /// A serialized plan could not be decoded.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// No Tokio runtime is available to host timers.
    #[error("No async runtime: {0}")]
    NoRuntime(String),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidPeriod(_) => "INVALID_PERIOD",
            SchedulerError::InvalidTimeOfDay(_) => "INVALID_TIME_OF_DAY",
            SchedulerError::InvalidMonthDay { .. } => "INVALID_MONTH_DAY",
            SchedulerError::InvalidPlan(_) => "INVALID_PLAN",
            SchedulerError::NoRuntime(_) => "NO_RUNTIME",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let cases = [
            (SchedulerError::InvalidPeriod("x".into()), "INVALID_PERIOD"),
            (SchedulerError::InvalidTimeOfDay("25:00".into()), "INVALID_TIME_OF_DAY"),
            (SchedulerError::InvalidMonthDay { month: 2, day: 30 }, "INVALID_MONTH_DAY"),
            (SchedulerError::InvalidPlan("eof".into()), "INVALID_PLAN"),
            (SchedulerError::NoRuntime("none".into()), "NO_RUNTIME"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn plan_decoding_reports_invalid_plan() {
        let err = crate::Plan::from_json(r#"{"kind":"sometimes"}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_PLAN");
    }
}
