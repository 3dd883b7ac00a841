//! Lazy recurrence sequences.
//!
//! A [`Schedule`] is an immutable description of "when to fire" as a
//! possibly infinite stream of gaps, each gap measured from the previously
//! produced value (the first one from the moment iteration starts). The
//! description is cheap to clone and can be iterated any number of times;
//! every iteration is an independent, stateful [`ScheduleIter`].
//!
//! Combinators either work on the gap stream directly (`concat`, `first`,
//! `offset`) or on its projection onto absolute instants (`merge`, `until`,
//! calendar plans). Both projections start from the same anchor instant.

use std::fmt;
use std::iter::{self, FusedIterator};
use std::sync::Arc;

use chrono::{DateTime, Utc, Weekday};
use tracing::warn;

use crate::calendar::{MonthDay, MonthDayDates, TimeOfDay, WeekdayDates};
use crate::context::ExecutionContext;
use crate::interval::Interval;
use crate::period::Period;
use crate::task::Task;

type GapIter = Box<dyn Iterator<Item = Interval> + Send>;
type DateIter = Box<dyn Iterator<Item = DateTime<Utc>> + Send>;
type GapFactory = Arc<dyn Fn() -> GapIter + Send + Sync>;
type DateFactory = Arc<dyn Fn() -> DateIter + Send + Sync>;
type OffsetFn = Arc<dyn Fn() -> Option<Interval> + Send + Sync>;

/// A reusable, lazily evaluated recurrence description.
///
/// ```
/// use cadence_scheduler::{Interval, Schedule};
///
/// let plan = Schedule::after(Interval::seconds(5))
///     .concat(Schedule::every(Interval::seconds(2)))
///     .first(3);
/// let gaps: Vec<_> = plan.iter().collect();
/// assert_eq!(gaps, [Interval::seconds(5), Interval::seconds(2), Interval::seconds(2)]);
/// ```
#[derive(Clone)]
pub struct Schedule {
    node: Arc<Node>,
}

enum Node {
    Never,
    Gaps(Vec<Interval>),
    Dates(Vec<DateTime<Utc>>),
    Every(Interval),
    EveryPeriod(Period),
    Custom(GapFactory),
    CustomDates(DateFactory),
    Concat(Schedule, Schedule),
    Merge(Schedule, Schedule),
    First(Schedule, usize),
    Until(Schedule, DateTime<Utc>),
    Offset(Schedule, OffsetFn),
    Calendar { rules: Vec<DateRule>, offset: Interval },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateRule {
    Weekday(Weekday),
    MonthDay(MonthDay),
}

impl Node {
    fn gaps(&self, anchor: DateTime<Utc>) -> GapIter {
        match self {
            Node::Never => Box::new(iter::empty()),
            Node::Gaps(gaps) => Box::new(gaps.clone().into_iter()),
            Node::Every(interval) => Box::new(iter::repeat(*interval)),
            Node::EveryPeriod(period) => Box::new(PeriodGaps::new(*period, anchor)),
            Node::Custom(factory) => factory(),
            Node::Concat(head, tail) => Box::new(ConcatGaps::new(
                head.node.gaps(anchor),
                Arc::clone(&tail.node),
                anchor,
            )),
            Node::First(inner, count) => Box::new(inner.node.gaps(anchor).take(*count)),
            Node::Offset(inner, offset) => {
                let offset = Arc::clone(offset);
                Box::new(
                    inner
                        .node
                        .gaps(anchor)
                        .map(move |gap| gap + offset().unwrap_or(Interval::ZERO)),
                )
            }
            Node::Dates(_)
            | Node::CustomDates(_)
            | Node::Merge(..)
            | Node::Until(..)
            | Node::Calendar { .. } => Box::new(DatesToGaps::new(self.dates(anchor), anchor)),
        }
    }

    fn dates(&self, anchor: DateTime<Utc>) -> DateIter {
        match self {
            Node::Dates(dates) => Box::new(dates.clone().into_iter()),
            Node::CustomDates(factory) => factory(),
            Node::Merge(left, right) => Box::new(MergeDates::new(
                left.node.dates(anchor),
                right.node.dates(anchor),
            )),
            Node::Until(inner, limit) => {
                let limit = *limit;
                Box::new(inner.node.dates(anchor).take_while(move |d| *d < limit))
            }
            Node::Calendar { rules, offset } => {
                Box::new(CalendarDates::new(rules, *offset, anchor))
            }
            _ => Box::new(GapsToDates::new(self.gaps(anchor), anchor)),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Never => f.write_str("Never"),
            Node::Gaps(gaps) => f.debug_tuple("Gaps").field(gaps).finish(),
            Node::Dates(dates) => f.debug_tuple("Dates").field(dates).finish(),
            Node::Every(interval) => f.debug_tuple("Every").field(interval).finish(),
            Node::EveryPeriod(period) => f.debug_tuple("EveryPeriod").field(period).finish(),
            Node::Custom(_) => f.write_str("Custom"),
            Node::CustomDates(_) => f.write_str("CustomDates"),
            Node::Concat(a, b) => f.debug_tuple("Concat").field(a).field(b).finish(),
            Node::Merge(a, b) => f.debug_tuple("Merge").field(a).field(b).finish(),
            Node::First(inner, n) => f.debug_tuple("First").field(inner).field(n).finish(),
            Node::Until(inner, limit) => f.debug_tuple("Until").field(inner).field(limit).finish(),
            Node::Offset(inner, _) => f.debug_tuple("Offset").field(inner).finish(),
            Node::Calendar { rules, offset } => f
                .debug_struct("Calendar")
                .field("rules", rules)
                .field("offset", offset)
                .finish(),
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.fmt(f)
    }
}

impl Schedule {
    fn from_node(node: Node) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    /// Yields nothing.
    pub fn never() -> Self {
        Self::from_node(Node::Never)
    }

    /// A single, immediate fire.
    pub fn now() -> Self {
        Self::of([Interval::ZERO])
    }

    pub fn after(delay: Interval) -> Self {
        Self::of([delay])
    }

    /// One fire after `delay`, then one every `interval` forever.
    pub fn after_repeating(delay: Interval, interval: Interval) -> Self {
        Self::after(delay).concat(Self::every(interval))
    }

    /// A single fire at `instant`, measured from when iteration starts. An
    /// instant already in the past yields a negative gap, i.e. nothing.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::of_dates([instant])
    }

    /// A constant gap forever. Non-positive intervals yield nothing.
    pub fn every(interval: Interval) -> Self {
        if interval <= Interval::ZERO {
            warn!(%interval, "non-positive repeat interval, schedule never fires");
            return Self::never();
        }
        Self::from_node(Node::Every(interval))
    }

    /// Calendar recurrence: every gap is re-derived by adding `period` to the
    /// previous absolute fire time, so "every month" tracks month lengths.
    pub fn every_period(period: Period) -> Self {
        Self::from_node(Node::EveryPeriod(period))
    }

    /// `every_period` from human text such as `"1 week and 2 days"`.
    /// Unparsable text yields [`Schedule::never`].
    pub fn every_str(text: &str) -> Self {
        match text.parse::<Period>() {
            Ok(period) => Self::every_period(period),
            Err(e) => {
                warn!(error = %e, "unparsable period, schedule never fires");
                Self::never()
            }
        }
    }

    pub fn of(gaps: impl IntoIterator<Item = Interval>) -> Self {
        Self::from_node(Node::Gaps(gaps.into_iter().collect()))
    }

    /// Absolute instants, converted to gaps from the iteration start onwards.
    pub fn of_dates(dates: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        Self::from_node(Node::Dates(dates.into_iter().collect()))
    }

    pub fn distant_past() -> Self {
        Self::at(DateTime::<Utc>::MIN_UTC)
    }

    pub fn distant_future() -> Self {
        Self::at(DateTime::<Utc>::MAX_UTC)
    }

    /// A schedule backed by a caller-supplied gap iterator; `factory` runs
    /// once per iteration.
    pub fn from_fn<F, I>(factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = Interval> + Send + 'static,
    {
        Self::from_node(Node::Custom(Arc::new(move || Box::new(factory()) as GapIter)))
    }

    /// Like [`Schedule::from_fn`] but the iterator yields absolute instants.
    pub fn from_date_fn<F, I>(factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = DateTime<Utc>> + Send + 'static,
    {
        Self::from_node(Node::CustomDates(Arc::new(move || {
            Box::new(factory()) as DateIter
        })))
    }

    pub fn every_weekday(weekday: Weekday) -> DatePlan {
        DatePlan::new(vec![DateRule::Weekday(weekday)])
    }

    /// Empty input gives a plan that never fires.
    pub fn every_weekdays(weekdays: impl IntoIterator<Item = Weekday>) -> DatePlan {
        DatePlan::new(weekdays.into_iter().map(DateRule::Weekday).collect())
    }

    pub fn every_month_day(month_day: MonthDay) -> DatePlan {
        DatePlan::new(vec![DateRule::MonthDay(month_day)])
    }

    pub fn every_month_days(month_days: impl IntoIterator<Item = MonthDay>) -> DatePlan {
        DatePlan::new(month_days.into_iter().map(DateRule::MonthDay).collect())
    }

    /// All of `self`'s gaps, then all of `other`'s.
    pub fn concat(self, other: Schedule) -> Self {
        Self::from_node(Node::Concat(self, other))
    }

    /// Interleave by absolute time, earliest first. On equal instants the
    /// left side is drained first and the right one follows with a zero gap.
    pub fn merge(self, other: Schedule) -> Self {
        Self::from_node(Node::Merge(self, other))
    }

    pub fn first(self, count: usize) -> Self {
        Self::from_node(Node::First(self, count))
    }

    /// Only fires strictly before `limit`.
    pub fn until(self, limit: DateTime<Utc>) -> Self {
        Self::from_node(Node::Until(self, limit))
    }

    /// Add a fixed extra gap to every value; `None` means zero.
    pub fn offset(self, by: Option<Interval>) -> Self {
        self.offset_with(move || by)
    }

    /// Add an extra gap recomputed for every value.
    pub fn offset_with<F>(self, by: F) -> Self
    where
        F: Fn() -> Option<Interval> + Send + Sync + 'static,
    {
        Self::from_node(Node::Offset(self, Arc::new(by)))
    }

    /// A fresh iteration anchored at the current wall-clock time.
    pub fn iter(&self) -> ScheduleIter {
        self.iter_from(Utc::now())
    }

    pub fn iter_from(&self, anchor: DateTime<Utc>) -> ScheduleIter {
        ScheduleIter {
            gaps: self.node.gaps(anchor),
            done: false,
        }
    }

    /// The absolute fire instants of a fresh iteration.
    pub fn dates(&self) -> ScheduleDates {
        self.dates_from(Utc::now())
    }

    pub fn dates_from(&self, anchor: DateTime<Utc>) -> ScheduleDates {
        ScheduleDates {
            gaps: self.iter_from(anchor),
            prev: anchor,
            done: false,
        }
    }

    /// True when a fresh iteration yields nothing. Probes a throwaway
    /// iteration, so iterations in use elsewhere are unaffected.
    pub fn is_never(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Start a [`Task`] running `action` on this schedule.
    pub fn spawn<C, F>(&self, ctx: &C, action: F) -> Task
    where
        C: ExecutionContext + ?Sized,
        F: Fn(&Task) + Send + Sync + 'static,
    {
        Task::new(self.clone(), ctx, action)
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::never()
    }
}

/// One pass over a [`Schedule`]. Stops for good at the first negative gap.
pub struct ScheduleIter {
    gaps: GapIter,
    done: bool,
}

impl Iterator for ScheduleIter {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        if self.done {
            return None;
        }
        match self.gaps.next() {
            Some(gap) if !gap.is_negative() => Some(gap),
            _ => {
                self.done = true;
                None
            }
        }
    }
}

impl FusedIterator for ScheduleIter {}

impl fmt::Debug for ScheduleIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleIter")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Absolute instants of one pass over a [`Schedule`].
#[derive(Debug)]
pub struct ScheduleDates {
    gaps: ScheduleIter,
    prev: DateTime<Utc>,
    done: bool,
}

impl Iterator for ScheduleDates {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        if self.done {
            return None;
        }
        match self.gaps.next().and_then(|gap| gap.add_to(self.prev)) {
            Some(next) => {
                self.prev = next;
                Some(next)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl FusedIterator for ScheduleDates {}

/// Calendar dates waiting for a time of day. See [`Schedule::every_weekday`].
#[derive(Debug, Clone)]
pub struct DatePlan {
    rules: Vec<DateRule>,
}

impl DatePlan {
    fn new(rules: Vec<DateRule>) -> Self {
        Self { rules }
    }

    pub fn is_never(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fire on every matching date at `time`. A match earlier today whose
    /// time has already passed is skipped.
    pub fn at(&self, time: TimeOfDay) -> Schedule {
        if self.is_never() {
            return Schedule::never();
        }
        Schedule::from_node(Node::Calendar {
            rules: self.rules.clone(),
            offset: time.since_start_of_day(),
        })
    }

    /// `at` with a parsed time such as `"9:30 pm"`; unparsable text never fires.
    pub fn at_str(&self, time: &str) -> Schedule {
        match time.parse::<TimeOfDay>() {
            Ok(time) => self.at(time),
            Err(e) => {
                warn!(error = %e, "unparsable time of day, schedule never fires");
                Schedule::never()
            }
        }
    }

    /// `at` with `[hour, minute?, second?, nanosecond?]`.
    pub fn at_parts(&self, parts: &[u32]) -> Schedule {
        match TimeOfDay::from_parts(parts) {
            Ok(time) => self.at(time),
            Err(e) => {
                warn!(error = %e, "invalid time of day, schedule never fires");
                Schedule::never()
            }
        }
    }
}

/// `prev + period` on the calendar, once per value.
struct PeriodGaps {
    period: Period,
    prev: DateTime<Utc>,
    done: bool,
}

impl PeriodGaps {
    fn new(period: Period, anchor: DateTime<Utc>) -> Self {
        Self {
            period,
            prev: anchor,
            done: false,
        }
    }
}

impl Iterator for PeriodGaps {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        if self.done {
            return None;
        }
        match self.period.add_to(self.prev) {
            // a period that does not move forward would repeat forever
            Some(next) if next > self.prev => {
                let gap = Interval::between(next, self.prev);
                self.prev = next;
                Some(gap)
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// Running sum of gaps from `anchor`.
struct GapsToDates {
    gaps: GapIter,
    prev: DateTime<Utc>,
    done: bool,
}

impl GapsToDates {
    fn new(gaps: GapIter, anchor: DateTime<Utc>) -> Self {
        Self {
            gaps,
            prev: anchor,
            done: false,
        }
    }
}

impl Iterator for GapsToDates {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        if self.done {
            return None;
        }
        match self.gaps.next().and_then(|gap| gap.add_to(self.prev)) {
            Some(next) => {
                self.prev = next;
                Some(next)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Head gaps, then tail gaps. The tail is anchored where the head ended,
/// so date-based tails keep their absolute instants.
struct ConcatGaps {
    head: GapIter,
    tail: Option<Arc<Node>>,
    tail_gaps: Option<GapIter>,
    reached: DateTime<Utc>,
}

impl ConcatGaps {
    fn new(head: GapIter, tail: Arc<Node>, anchor: DateTime<Utc>) -> Self {
        Self {
            head,
            tail: Some(tail),
            tail_gaps: None,
            reached: anchor,
        }
    }
}

impl Iterator for ConcatGaps {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        if self.tail_gaps.is_none() {
            if let Some(gap) = self.head.next() {
                if let Some(next) = gap.add_to(self.reached) {
                    self.reached = next;
                }
                return Some(gap);
            }
            let tail = self.tail.take()?;
            self.tail_gaps = Some(tail.gaps(self.reached));
        }
        self.tail_gaps.as_mut()?.next()
    }
}

/// Differences between consecutive instants, the first one from `anchor`.
/// The first date is allowed to precede the anchor (yielding a negative gap
/// that ends the schedule); later dates going backwards end it directly.
struct DatesToGaps {
    dates: DateIter,
    prev: DateTime<Utc>,
    started: bool,
    done: bool,
}

impl DatesToGaps {
    fn new(dates: DateIter, anchor: DateTime<Utc>) -> Self {
        Self {
            dates,
            prev: anchor,
            started: false,
            done: false,
        }
    }
}

impl Iterator for DatesToGaps {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        if self.done {
            return None;
        }
        match self.dates.next() {
            Some(next) if !self.started || next >= self.prev => {
                let gap = Interval::between(next, self.prev);
                self.started = true;
                self.prev = next;
                Some(gap)
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// Two-way merge of instant streams holding at most one pending value per side.
struct MergeDates {
    left: iter::Fuse<DateIter>,
    right: iter::Fuse<DateIter>,
    left_pending: Option<DateTime<Utc>>,
    right_pending: Option<DateTime<Utc>>,
}

impl MergeDates {
    fn new(left: DateIter, right: DateIter) -> Self {
        Self {
            left: left.fuse(),
            right: right.fuse(),
            left_pending: None,
            right_pending: None,
        }
    }
}

impl Iterator for MergeDates {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        if self.left_pending.is_none() {
            self.left_pending = self.left.next();
        }
        if self.right_pending.is_none() {
            self.right_pending = self.right.next();
        }

        match (self.left_pending, self.right_pending) {
            (Some(l), Some(r)) if r < l => self.right_pending.take(),
            (Some(_), _) => self.left_pending.take(),
            (None, _) => self.right_pending.take(),
        }
    }
}

/// Merged calendar matches shifted by a time of day, dropping any that
/// fall before the anchor.
struct CalendarDates {
    dates: DateIter,
    offset: Interval,
    anchor: DateTime<Utc>,
}

impl CalendarDates {
    fn new(rules: &[DateRule], offset: Interval, anchor: DateTime<Utc>) -> Self {
        let dates = rules
            .iter()
            .map(|rule| -> DateIter {
                match *rule {
                    DateRule::Weekday(w) => Box::new(WeekdayDates::new(anchor, w)),
                    DateRule::MonthDay(md) => Box::new(MonthDayDates::new(anchor, md)),
                }
            })
            .reduce(|merged, next| -> DateIter { Box::new(MergeDates::new(merged, next)) })
            .unwrap_or_else(|| Box::new(iter::empty()));
        Self {
            dates,
            offset,
            anchor,
        }
    }
}

impl Iterator for CalendarDates {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        loop {
            let date = self.offset.add_to(self.dates.next()?)?;
            if date >= self.anchor {
                return Some(date);
            }
        }
    }
}
