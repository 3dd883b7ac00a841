use cadence_core::Locked;
use chrono::{DateTime, Utc};

use crate::interval::Interval;

/// Source of "now" for tasks and execution contexts.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to drive a
/// [`RunLoop`](crate::context::RunLoop) deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Locked<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Locked::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        self.now.write(|now| *now = instant);
    }

    /// Move forward (or backward, for a negative interval). Saturates at
    /// chrono's representable range.
    pub fn advance(&self, by: Interval) {
        self.now.write(|now| {
            if let Some(next) = by.add_to(*now) {
                *now = next;
            }
        });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.snapshot()
    }
}
