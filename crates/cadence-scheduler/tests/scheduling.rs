// End-to-end behaviour of schedules, tasks and registries on a run loop
// driven by a manual clock, so every fire is deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cadence_core::Locked;
use cadence_scheduler::{
    Interval, ManualClock, Plan, RunLoop, Schedule, Task, TaskCenter, TimeOfDay,
};
use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};

struct Harness {
    clock: Arc<ManualClock>,
    rl: RunLoop,
    center: TaskCenter,
    start: DateTime<Utc>,
}

impl Harness {
    fn new() -> Self {
        // a Monday, mid-morning
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let rl = RunLoop::new(clock.clone());
        Self {
            clock,
            rl,
            center: TaskCenter::new(),
            start,
        }
    }

    fn counted(&self, schedule: Schedule) -> (Task, Arc<AtomicUsize>) {
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

    fn advance(&self, by: Interval) -> usize {
        self.clock.advance(by);
        self.rl.run_pending()
    }

    fn step_seconds(&self, n: i64) -> usize {
        (0..n).map(|_| self.advance(Interval::seconds(1))).sum()
    }
}

#[test]
fn never_task_only_runs_when_forced() {
    let h = Harness::new();
    let (task, count) = h.counted(Schedule::never());

    assert_eq!(task.estimated_next_execution(), None);
    assert_eq!(h.step_seconds(10), 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    task.execute_now();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn constant_interval_fires_each_period() {
    let h = Harness::new();
    let (task, count) = h.counted(Schedule::every(Interval::seconds(1)));

    assert_eq!(h.step_seconds(5), 5);
    assert_eq!(count.load(Ordering::SeqCst), 5);
    let history = task.executions().unwrap();
    assert_eq!(history.len(), 5);
    assert!(history.windows(2).all(|w| w[1] - w[0] == Duration::seconds(1)));
}

#[test]
fn concat_drives_delay_then_repeat() {
    let h = Harness::new();
    let (task, count) = h.counted(
        Schedule::after(Interval::seconds(5))
            .concat(Schedule::every(Interval::seconds(2)))
            .first(3),
    );

    assert_eq!(h.step_seconds(4), 0);
    assert_eq!(h.step_seconds(1), 1);
    assert_eq!(h.step_seconds(4), 2);
    assert_eq!(h.step_seconds(10), 0);
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(
        task.executions().unwrap(),
        [5, 7, 9].map(|s| h.start + Duration::seconds(s))
    );
}

#[test]
fn concat_keeps_absolute_tail_instant() {
    let h = Harness::new();
    let target = h.start + Duration::seconds(10);
    let (task, count) =
        h.counted(Schedule::after(Interval::seconds(5)).concat(Schedule::at(target)));

    assert_eq!(h.step_seconds(5), 1);
    assert_eq!(task.estimated_next_execution(), Some(target));

    assert_eq!(h.step_seconds(4), 0);
    assert_eq!(h.step_seconds(1), 1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(task.executions().unwrap(), [h.start + Duration::seconds(5), target]);
    assert_eq!(task.estimated_next_execution(), None);
}

#[test]
fn merged_dates_fire_in_time_order() {
    let h = Harness::new();
    let order = Arc::new(Locked::new(Vec::new()));
    let at = |s| h.start + Duration::seconds(s);

    let o = Arc::clone(&order);
    let task = Task::with_center(
        Schedule::of_dates([at(1), at(3)]).merge(Schedule::of_dates([at(2), at(4)])),
        &h.rl,
        move |t: &Task| {
            let when = t.last_execution();
            o.write(|v| v.extend(when));
        },
        &h.center,
    );

    h.step_seconds(6);
    assert_eq!(order.snapshot(), [1, 2, 3, 4].map(at));
    assert_eq!(task.execution_count(), 4);
}

#[test]
fn until_stops_before_the_limit() {
    let h = Harness::new();
    let limit = h.start + Duration::milliseconds(2500);
    let (_task, count) = h.counted(Schedule::every(Interval::seconds(1)).until(limit));

    h.step_seconds(10);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn late_fire_skips_to_the_next_boundary() {
    let h = Harness::new();
    let (task, count) = h.counted(Schedule::every(Interval::seconds(1)));

    // the host stalls for several periods
    assert_eq!(h.advance(Interval::milliseconds(4200)), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(
        task.estimated_next_execution(),
        Some(h.start + Duration::seconds(5))
    );

    assert_eq!(h.advance(Interval::milliseconds(800)), 1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn calendar_period_tracks_month_lengths() {
    let h = Harness::new();
    let (task, _) = h.counted(Schedule::every_str("1 month"));
    assert_eq!(
        task.estimated_next_execution(),
        Some(Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap())
    );

    h.clock.set(Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap());
    assert_eq!(h.rl.run_pending(), 1);
    assert_eq!(
        task.estimated_next_execution(),
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
    );
}

#[test]
fn weekday_schedule_fires_at_time_of_day_every_week() {
    let h = Harness::new();
    let plan = Schedule::every_weekday(Weekday::Mon).at(TimeOfDay::hm(9, 0).unwrap());
    let (task, count) = h.counted(plan);

    // today's 09:00 already passed
    let next_monday = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
    assert_eq!(task.estimated_next_execution(), Some(next_monday));

    h.clock.set(next_monday);
    assert_eq!(h.rl.run_pending(), 1);
    assert_eq!(
        task.estimated_next_execution(),
        Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap())
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn nested_suspension_holds_until_fully_resumed() {
    let h = Harness::new();
    let (task, count) = h.counted(Schedule::every(Interval::seconds(1)));

    task.suspend();
    task.suspend();
    task.resume();
    assert_eq!(task.suspension_count(), 1);
    assert_eq!(h.step_seconds(3), 0);

    task.resume();
    assert_eq!(task.suspension_count(), 0);
    assert_eq!(h.rl.run_pending(), 1);
    task.resume();
    assert_eq!(task.suspension_count(), 0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn removed_action_does_not_run() {
    let h = Harness::new();
    let (task, original) = h.counted(Schedule::after(Interval::seconds(1)));
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let f = Arc::clone(&first);
    let key = task.add_action(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });
    let s = Arc::clone(&second);
    task.add_action(move |_| {
        s.fetch_add(1, Ordering::SeqCst);
    });
    task.remove_action(key);

    h.step_seconds(1);
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(original.load(Ordering::SeqCst), 1);
}

#[test]
fn tags_vanish_with_their_tasks() {
    let h = Harness::new();
    let (task, _) = h.counted(Schedule::every(Interval::seconds(1)));
    h.center.add_tag(&task, "reports");
    assert_eq!(h.center.all_tags(), vec!["reports"]);

    drop(task);
    assert!(h.center.all_tags().is_empty());
    assert!(h.center.tasks_for("reports").is_empty());
    assert_eq!(h.rl.timer_count(), 0);
}

#[test]
fn registries_are_exclusive() {
    let h = Harness::new();
    let (task, _) = h.counted(Schedule::every(Interval::seconds(1)));
    h.center.add_tag(&task, "a");

    let other = TaskCenter::new();
    other.add(&task);
    assert!(!h.center.contains(&task));
    assert!(h.center.all_tags().is_empty());
    assert_eq!(other.all_tasks(), vec![task]);
}

#[test]
fn cancel_is_idempotent_and_final() {
    let h = Harness::new();
    let (task, count) = h.counted(Schedule::every(Interval::seconds(1)));

    task.cancel();
    task.cancel();
    assert!(task.is_cancelled());

    task.suspend();
    task.resume();
    task.reschedule(&Schedule::now());
    assert_eq!(task.suspension_count(), 0);
    assert_eq!(h.step_seconds(3), 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn dropping_a_suspended_task_releases_its_timer() {
    let h = Harness::new();
    let (task, _) = h.counted(Schedule::every(Interval::seconds(1)));
    task.suspend();
    task.suspend();
    drop(task);
    assert_eq!(h.rl.timer_count(), 0);
    assert_eq!(h.step_seconds(2), 0);
}

#[test]
fn default_registry_is_global() {
    let h = Harness::new();
    let task = Schedule::every(Interval::seconds(1)).spawn(&h.rl, |_| {});
    assert!(TaskCenter::global().contains(&task));
    assert_eq!(task.center().as_ref(), Some(TaskCenter::global()));

    let id = task.id();
    drop(task);
    assert!(TaskCenter::global().all_tasks().iter().all(|t| t.id() != id));
}

#[test]
fn plans_drive_tasks() {
    let h = Harness::new();
    let plan = Plan::from_json(r#"{"kind":"every","seconds":2,"first":2}"#).unwrap();
    let (_task, count) = h.counted(plan.to_schedule());

    h.step_seconds(10);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}
