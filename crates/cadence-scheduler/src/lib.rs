//! `cadence-scheduler` — in-process recurring tasks driven by lazy schedules.
//!
//! # Overview
//!
//! A [`Schedule`] describes *when* to fire as a lazy, possibly infinite
//! stream of gaps. A [`Task`] binds a schedule to one timer obtained from an
//! [`ExecutionContext`] and runs its actions on every fire, re-deriving the
//! next fire from elapsed wall time so late fires skip missed slots instead
//! of bursting. Tasks can be grouped by tag in a [`TaskCenter`] for bulk
//! suspend / resume / cancel.
//!
//! ```no_run
//! use cadence_scheduler::{Interval, Schedule, TokioContext};
//!
//! # async fn demo() -> cadence_scheduler::Result<()> {
//! let ctx = TokioContext::try_current()?;
//! let task = Schedule::every(Interval::seconds(5)).spawn(&ctx, |task| {
//!     println!("fired {} times", task.execution_count());
//! });
//! task.suspend();
//! task.resume();
//! # Ok(())
//! # }
//! ```
//!
//! # Schedule building blocks
//!
//! | Constructor             | Fires                                           |
//! |-------------------------|-------------------------------------------------|
//! | `never` / `now`         | not at all / once, immediately                  |
//! | `after` / `at`          | once, after a delay / at an instant             |
//! | `every`                 | forever, constant gap                           |
//! | `every_period`          | forever, calendar-aware (months, years)         |
//! | `every_weekday(..).at`  | on matching weekdays at a time of day           |
//! | `every_month_day(..).at`| on matching days of the year at a time of day   |
//!
//! Combinators: `concat`, `merge`, `first`, `until`, `offset`.
//!
//! # Execution contexts
//!
//! [`TokioContext`] runs each timer as a Tokio task. [`RunLoop`] holds plain
//! deadlines fired by [`RunLoop::run_pending`], which makes it the context
//! of choice for deterministic tests with a [`ManualClock`].

pub mod bag;
pub mod calendar;
pub mod center;
pub mod clock;
pub mod context;
pub mod error;
pub mod interval;
pub mod period;
pub mod plan;
pub mod schedule;
pub mod task;

use std::time::Duration;

use cadence_core::CadenceConfig;
use tracing::debug;

pub use bag::{Bag, BagKey};
pub use calendar::{MonthDay, TimeOfDay};
pub use center::TaskCenter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ExecutionContext, RunLoop, Timer, TimerHandler, TokioClock, TokioContext};
pub use error::{Result, SchedulerError};
pub use interval::Interval;
pub use period::{Period, TideLevel};
pub use plan::{Plan, Rule, YearDay};
pub use schedule::{DatePlan, Schedule, ScheduleDates, ScheduleIter};
pub use task::{ActionKey, Task, TaskId};

/// Apply process-wide settings from `config`: registers the extra period
/// quantifiers and returns the run-loop tick to pass to [`RunLoop::drive`].
pub fn apply_config(config: &CadenceConfig) -> Duration {
    for (word, number) in &config.parser.quantifiers {
        Period::register_quantifier(word, *number);
    }
    let tick = config.loop_tick();
    debug!(
        quantifiers = config.parser.quantifiers.len(),
        tick_ms = tick.as_millis() as u64,
        "configuration applied"
    );
    tick
}
