use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use cadence_core::Locked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bag::{Bag, BagKey};
use crate::center::{CenterShared, TaskCenter};
use crate::clock::Clock;
use crate::context::{ExecutionContext, Timer, TimerHandler};
use crate::interval::Interval;
use crate::schedule::{Schedule, ScheduleIter};

/// Process-unique task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Token returned by [`Task::add_action`]; only good for removing that action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey(BagKey);

type Action = Arc<dyn Fn(&Task) + Send + Sync>;

/// A schedule bound to a timer and a set of actions.
///
/// `Task` is a cheap handle: clones share the same underlying task, and the
/// task is torn down (timer cancelled, registry entry dropped) when the last
/// handle goes away. Registries only hold weak references, so tagging a task
/// never keeps it alive.
///
/// The timer re-arms itself after every fire from the task's own
/// [`ScheduleIter`], which is consumed and never restarted. Fires that
/// arrive late skip every missed slot instead of bursting.
///
/// Actions run on the execution context's timer thread after the task's
/// lock is released. A slow action delays the delivery of the next fire of
/// the same task (not its estimate).
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

pub(crate) struct TaskInner {
    id: TaskId,
    created_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    timer: Box<dyn Timer>,
    state: Locked<TaskState>,
}

struct TaskState {
    iter: ScheduleIter,
    actions: Bag<Action>,
    suspensions: u64,
    execution_count: u64,
    executions: Option<Vec<DateTime<Utc>>>,
    next_estimate: Option<DateTime<Utc>>,
    cancelled: bool,
    center: Option<Weak<CenterShared>>,
}

impl TaskState {
    fn record_execution(&mut self, now: DateTime<Utc>) -> Vec<Action> {
        self.executions.get_or_insert_with(Vec::new).push(now);
        self.execution_count += 1;
        self.actions.iter().cloned().collect()
    }
}

impl Task {
    /// Start `action` on `schedule`, registered in [`TaskCenter::global`].
    pub fn new<C, F>(schedule: Schedule, ctx: &C, action: F) -> Task
    where
        C: ExecutionContext + ?Sized,
        F: Fn(&Task) + Send + Sync + 'static,
    {
        Self::with_center(schedule, ctx, action, TaskCenter::global())
    }

    /// Like [`Task::new`] but registered in `center`.
    pub fn with_center<C, F>(schedule: Schedule, ctx: &C, action: F, center: &TaskCenter) -> Task
    where
        C: ExecutionContext + ?Sized,
        F: Fn(&Task) + Send + Sync + 'static,
    {
        let clock = ctx.clock();
        let now = clock.now();

        let mut iter = schedule.iter_from(now);
        let first = iter
            .next()
            .and_then(|gap| gap.add_to(now).map(|at| (gap, at)));

        let mut actions: Bag<Action> = Bag::new();
        actions.insert(Arc::new(action));

        let inner = Arc::new_cyclic(|weak: &Weak<TaskInner>| {
            let weak = weak.clone();
            let handler: TimerHandler = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Task { inner }.elapse();
                }
            });
            TaskInner {
                id: TaskId::new(),
                created_at: now,
                clock,
                timer: ctx.create_timer(handler),
                state: Locked::new(TaskState {
                    iter,
                    actions,
                    suspensions: 0,
                    execution_count: 0,
                    executions: None,
                    next_estimate: first.map(|(_, at)| at),
                    cancelled: false,
                    center: None,
                }),
            }
        });
        let task = Task { inner };

        // arm only once the handler can reach the task
        match first {
            Some((gap, at)) => {
                task.inner.timer.schedule(gap);
                debug!(task_id = %task.id(), next = %at, "task armed");
            }
            None => debug!(task_id = %task.id(), "task created with an empty schedule"),
        }

        center.add(&task);
        task
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Every execution instant so far, `None` before the first one.
    pub fn executions(&self) -> Option<Vec<DateTime<Utc>>> {
        self.inner.state.read(|s| s.executions.clone())
    }

    pub fn first_execution(&self) -> Option<DateTime<Utc>> {
        self.inner
            .state
            .read(|s| s.executions.as_ref().and_then(|e| e.first().copied()))
    }

    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.inner
            .state
            .read(|s| s.executions.as_ref().and_then(|e| e.last().copied()))
    }

    /// When the timer is next expected to fire; `None` once the schedule is
    /// exhausted or the task is cancelled.
    pub fn estimated_next_execution(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read(|s| s.next_estimate)
    }

    pub fn execution_count(&self) -> u64 {
        self.inner.state.read(|s| s.execution_count)
    }

    /// Outstanding [`suspend`](Self::suspend) calls.
    pub fn suspension_count(&self) -> u64 {
        self.inner.state.read(|s| s.suspensions)
    }

    pub fn action_count(&self) -> usize {
        self.inner.state.read(|s| s.actions.len())
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.read(|s| s.cancelled)
    }

    /// The registry this task currently belongs to, if it is still alive.
    pub fn center(&self) -> Option<TaskCenter> {
        self.inner
            .state
            .read(|s| s.center.as_ref().and_then(Weak::upgrade))
            .map(TaskCenter::from_shared)
    }

    /// Move this task into `center`, leaving any previous registry.
    pub fn add_to_center(&self, center: &TaskCenter) {
        center.add(self);
    }

    /// Leave the current registry, dropping all tags there.
    pub fn remove_from_center(&self) {
        let id = self.id();
        self.inner.state.write(|s| {
            if let Some(center) = s.center.take().and_then(|w| w.upgrade()) {
                center.forget(id);
            }
        });
    }

    pub fn add_action<F>(&self, action: F) -> ActionKey
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        let key = self
            .inner
            .state
            .write(|s| s.actions.insert(Arc::new(action) as Action));
        ActionKey(key)
    }

    /// Remove one action. Returns `false` when the key is stale.
    pub fn remove_action(&self, key: ActionKey) -> bool {
        self.inner
            .state
            .write(|s| s.actions.remove(key.0).is_some())
    }

    pub fn remove_all_actions(&self) {
        self.inner.state.write(|s| s.actions.clear());
    }

    /// Pause the timer. Calls nest: the timer resumes only after as many
    /// [`resume`](Self::resume) calls. No-op once cancelled.
    pub fn suspend(&self) {
        let depth = self.inner.state.write(|s| {
            if s.cancelled {
                return None;
            }
            s.suspensions = s.suspensions.saturating_add(1);
            if s.suspensions == 1 {
                self.inner.timer.suspend();
            }
            Some(s.suspensions)
        });
        if let Some(depth) = depth {
            debug!(task_id = %self.id(), depth, "task suspended");
        }
    }

    /// Undo one [`suspend`](Self::suspend). No-op at depth zero or once cancelled.
    pub fn resume(&self) {
        let depth = self.inner.state.write(|s| {
            if s.cancelled || s.suspensions == 0 {
                return None;
            }
            s.suspensions -= 1;
            if s.suspensions == 0 {
                self.inner.timer.resume();
            }
            Some(s.suspensions)
        });
        if let Some(depth) = depth {
            debug!(task_id = %self.id(), depth, "task resumed");
        }
    }

    /// Stop the task for good. An action already running is not interrupted.
    pub fn cancel(&self) {
        let first = self.inner.state.write(|s| {
            if s.cancelled {
                return false;
            }
            self.inner.timer.cancel();
            s.cancelled = true;
            s.suspensions = 0;
            s.next_estimate = None;
            true
        });
        if first {
            info!(task_id = %self.id(), "task cancelled");
        }
    }

    /// Replace the schedule with a fresh iteration of `schedule` anchored at
    /// now. History and counts are kept. No-op once cancelled.
    pub fn reschedule(&self, schedule: &Schedule) {
        let now = self.inner.clock.now();
        let rescheduled = self.inner.state.write(|s| {
            if s.cancelled {
                return false;
            }
            s.iter = schedule.iter_from(now);
            s.next_estimate = None;
            self.inner.advance(s, now);
            true
        });
        if rescheduled {
            debug!(task_id = %self.id(), "task rescheduled");
        }
    }

    /// Run every action right away without touching the schedule.
    pub fn execute_now(&self) {
        let now = self.inner.clock.now();
        let actions = self.inner.state.write(|s| s.record_execution(now));
        self.invoke(&actions);
    }

    /// Timer fire: advance past `now`, re-arm, then run the actions.
    fn elapse(&self) {
        let now = self.inner.clock.now();
        let actions = self.inner.state.write(|s| {
            // a fire that raced a cancel
            if s.cancelled {
                return None;
            }
            self.inner.advance(s, now);
            Some(s.record_execution(now))
        });
        if let Some(actions) = actions {
            self.invoke(&actions);
        }
    }

    fn invoke(&self, actions: &[Action]) {
        for action in actions {
            action(self);
        }
    }
}

impl TaskInner {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    fn is_in(s: &TaskState, center: &Arc<CenterShared>) -> bool {
        s.center
            .as_ref()
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(center)))
    }

    /// Make `center` this task's registry, leaving the previous one in the
    /// same step. `None` when already a member, otherwise whether the task
    /// moved out of another registry.
    pub(crate) fn join(self: &Arc<Self>, center: &Arc<CenterShared>) -> Option<bool> {
        self.state.write(|s| {
            if Self::is_in(s, center) {
                return None;
            }
            let previous = s.center.take().and_then(|w| w.upgrade());
            if let Some(previous) = &previous {
                previous.forget(self.id);
            }
            center.register(self.id, Arc::downgrade(self));
            s.center = Some(Arc::downgrade(center));
            Some(previous.is_some())
        })
    }

    /// Leave `center` if it is this task's registry.
    pub(crate) fn leave(&self, center: &Arc<CenterShared>) -> bool {
        self.state.write(|s| {
            if !Self::is_in(s, center) {
                return false;
            }
            center.forget(self.id);
            s.center = None;
            true
        })
    }

    /// Pull gaps until the running estimate reaches `now`, then arm the
    /// timer for what is left. Slots already in the past are skipped.
    fn advance(&self, s: &mut TaskState, now: DateTime<Utc>) {
        let mut estimate = s.next_estimate.unwrap_or(now);
        loop {
            match s.iter.next().and_then(|gap| gap.add_to(estimate)) {
                Some(next) => {
                    estimate = next;
                    if estimate >= now {
                        break;
                    }
                }
                None => {
                    s.next_estimate = None;
                    self.timer.disarm();
                    debug!(task_id = %self.id, "schedule exhausted");
                    return;
                }
            }
        }
        s.next_estimate = Some(estimate);
        self.timer.schedule(Interval::between(estimate, now));
    }
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.suspensions > 0 {
            self.timer.resume();
            state.suspensions = 0;
        }
        self.timer.cancel();
        if let Some(center) = state.center.take().and_then(|w| w.upgrade()) {
            center.forget(self.id);
        }
        debug!(task_id = %self.id, "task dropped");
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (count, suspensions, next, cancelled) = self.inner.state.read(|s| {
            (
                s.execution_count,
                s.suspensions,
                s.next_estimate,
                s.cancelled,
            )
        });
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("execution_count", &count)
            .field("suspensions", &suspensions)
            .field("next", &next)
            .field("cancelled", &cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::RunLoop;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        clock: Arc<ManualClock>,
        rl: RunLoop,
        center: TaskCenter,
        t0: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            let clock = Arc::new(ManualClock::new(t0));
            let rl = RunLoop::new(clock.clone());
            Self {
                clock,
                rl,
                center: TaskCenter::new(),
                t0,
            }
        }

        fn task(&self, schedule: Schedule) -> (Task, Arc<AtomicUsize>) {
            let count = Arc::new(AtomicUsize::new(0));
            let c = Arc::clone(&count);
            let task = Task::with_center(
                schedule,
                &self.rl,
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                &self.center,
            );
            (task, count)
        }

        fn tick(&self, secs: i64) -> usize {
            self.clock.advance(Interval::seconds(secs));
            self.rl.run_pending()
        }

        fn at(&self, secs: i64) -> DateTime<Utc> {
            self.t0 + chrono::Duration::seconds(secs)
        }
    }

    #[test]
    fn first_gap_arms_the_timer() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::every(Interval::seconds(2)));
        assert_eq!(task.estimated_next_execution(), Some(fx.at(2)));
        assert_eq!(task.created_at(), fx.t0);

        assert_eq!(fx.tick(1), 0);
        assert_eq!(fx.tick(1), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(task.estimated_next_execution(), Some(fx.at(4)));
        assert_eq!(task.executions(), Some(vec![fx.at(2)]));
    }

    #[test]
    fn empty_schedule_is_exhausted_from_birth() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::never());
        assert_eq!(task.estimated_next_execution(), None);
        assert_eq!(task.executions(), None);
        assert_eq!(fx.tick(100), 0);

        task.execute_now();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(task.execution_count(), 1);
        assert_eq!(task.first_execution(), Some(fx.at(100)));
    }

    #[test]
    fn late_fire_skips_missed_slots() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::every(Interval::seconds(1)));

        fx.clock.advance(Interval::milliseconds(3500));
        assert_eq!(fx.rl.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(task.estimated_next_execution(), Some(fx.at(4)));
        assert_eq!(fx.rl.next_deadline(), Some(fx.at(4)));
    }

    #[test]
    fn finite_schedule_runs_out() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::every(Interval::seconds(1)).first(2));
        fx.tick(1);
        fx.tick(1);
        assert_eq!(task.estimated_next_execution(), None);
        assert_eq!(fx.tick(5), 0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(task.last_execution(), Some(fx.at(2)));
    }

    #[test]
    fn nested_suspension() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::every(Interval::seconds(1)));

        task.suspend();
        task.suspend();
        task.resume();
        assert_eq!(task.suspension_count(), 1);
        assert_eq!(fx.tick(2), 0);

        task.resume();
        task.resume();
        assert_eq!(task.suspension_count(), 0);
        assert_eq!(fx.rl.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_remaining_actions_run() {
        let fx = Fixture::new();
        let (task, first) = fx.task(Schedule::after(Interval::seconds(1)));
        task.remove_all_actions();

        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let (ca, cb) = (Arc::clone(&a), Arc::clone(&b));
        let key_a = task.add_action(move |_| {
            ca.fetch_add(1, Ordering::SeqCst);
        });
        task.add_action(move |_| {
            cb.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.remove_action(key_a));
        assert!(!task.remove_action(key_a));
        assert_eq!(task.action_count(), 1);

        fx.tick(1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_is_terminal_and_idempotent() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::every(Interval::seconds(1)));
        task.suspend();
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.suspension_count(), 0);
        assert_eq!(task.estimated_next_execution(), None);

        task.suspend();
        assert_eq!(task.suspension_count(), 0);
        task.resume();
        task.reschedule(&Schedule::now());
        assert_eq!(task.estimated_next_execution(), None);
        assert_eq!(fx.tick(10), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reschedule_starts_from_now_and_keeps_history() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::every(Interval::seconds(1)));
        fx.tick(1);

        fx.clock.advance(Interval::milliseconds(500));
        task.reschedule(&Schedule::every(Interval::seconds(10)));
        assert_eq!(
            task.estimated_next_execution(),
            Some(fx.t0 + chrono::Duration::milliseconds(11_500))
        );
        assert_eq!(fx.tick(5), 0);
        assert_eq!(fx.tick(5), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(task.execution_count(), 2);
    }

    #[test]
    fn actions_receive_the_task_and_may_reenter_it() {
        let fx = Fixture::new();
        let center = fx.center.clone();
        let task = Task::with_center(
            Schedule::every(Interval::seconds(1)),
            &fx.rl,
            |task| {
                if task.execution_count() == 2 {
                    task.cancel();
                }
            },
            &center,
        );
        fx.tick(1);
        fx.tick(1);
        assert!(task.is_cancelled());
        assert_eq!(fx.tick(1), 0);
    }

    #[test]
    fn dropping_the_last_handle_tears_down() {
        let fx = Fixture::new();
        let (task, count) = fx.task(Schedule::every(Interval::seconds(1)));
        task.suspend();
        let clone = task.clone();
        drop(task);
        assert_eq!(fx.rl.timer_count(), 1);
        drop(clone);
        assert_eq!(fx.rl.timer_count(), 0);
        assert!(fx.center.all_tasks().is_empty());
        assert_eq!(fx.tick(5), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn identity_is_by_id() {
        let fx = Fixture::new();
        let (a, _) = fx.task(Schedule::never());
        let (b, _) = fx.task(Schedule::never());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
