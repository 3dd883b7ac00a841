//! Where task timers live and fire.
//!
//! A [`Task`](crate::Task) never sleeps on its own: it asks an
//! [`ExecutionContext`] for a [`Timer`] and re-arms it after every fire.
//! Two contexts ship with the crate:
//!
//! - [`TokioContext`]: one lightweight Tokio task per timer, firing on the
//!   runtime's workers.
//! - [`RunLoop`]: timers are plain deadlines fired by whoever calls
//!   [`RunLoop::run_pending`], either by hand (deterministic tests with a
//!   [`ManualClock`](crate::ManualClock)) or from [`RunLoop::drive`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::Locked;
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SchedulerError};
use crate::interval::Interval;

/// Callback a timer invokes when its deadline passes.
pub type TimerHandler = Arc<dyn Fn() + Send + Sync>;

/// A one-shot, re-armable timer.
///
/// A fresh timer is unarmed. [`schedule`](Timer::schedule) replaces any
/// pending deadline. A suspended timer holds its deadline without firing
/// and fires promptly on resume if the deadline has passed meanwhile.
pub trait Timer: Send + Sync {
    fn schedule(&self, after: Interval);

    /// Drop the pending deadline, if any.
    fn disarm(&self);

    fn suspend(&self);

    fn resume(&self);

    /// Permanently stop the timer. Idempotent.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Supplies the clock tasks measure against and the timers they fire on.
pub trait ExecutionContext: Send + Sync {
    fn clock(&self) -> Arc<dyn Clock>;

    fn create_timer(&self, handler: TimerHandler) -> Box<dyn Timer>;
}

// ---------------------------------------------------------------------------
// Tokio
// ---------------------------------------------------------------------------

/// Wall time derived from Tokio's monotonic clock, so a paused runtime
/// (`tokio::time::pause`) also freezes what tasks see as "now".
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base_wall: DateTime<Utc>,
    base: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base_wall: Utc::now(),
            base: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Interval::from(self.base.elapsed());
        elapsed.add_to(self.base_wall).unwrap_or(self.base_wall)
    }
}

/// Runs task timers as Tokio tasks on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioContext {
    handle: Handle,
    clock: Arc<TokioClock>,
}

impl TokioContext {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            clock: Arc::new(TokioClock::new()),
        }
    }

    /// Bind to the runtime the caller is running on.
    pub fn try_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::NoRuntime(e.to_string()))
    }
}

impl ExecutionContext for TokioContext {
    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn create_timer(&self, handler: TimerHandler) -> Box<dyn Timer> {
        let shared = Arc::new(TokioTimerShared {
            state: Locked::new(TokioTimerState::default()),
            wake: Notify::new(),
        });
        self.handle
            .spawn(run_tokio_timer(Arc::clone(&shared), handler));
        Box::new(TokioTimer { shared })
    }
}

#[derive(Debug, Default)]
struct TokioTimerState {
    deadline: Option<Instant>,
    suspended: bool,
    cancelled: bool,
}

struct TokioTimerShared {
    state: Locked<TokioTimerState>,
    wake: Notify,
}

impl TokioTimerShared {
    fn update(&self, f: impl FnOnce(&mut TokioTimerState)) {
        self.state.write(f);
        self.wake.notify_one();
    }
}

struct TokioTimer {
    shared: Arc<TokioTimerShared>,
}

impl Timer for TokioTimer {
    fn schedule(&self, after: Interval) {
        let delay = after.to_std().unwrap_or_default();
        // unrepresentable deadlines are treated as "never"
        let deadline = Instant::now().checked_add(delay);
        self.shared.update(|s| s.deadline = deadline);
    }

    fn disarm(&self) {
        self.shared.update(|s| s.deadline = None);
    }

    fn suspend(&self) {
        self.shared.update(|s| s.suspended = true);
    }

    fn resume(&self) {
        self.shared.update(|s| s.suspended = false);
    }

    fn cancel(&self) {
        self.shared.update(|s| {
            s.cancelled = true;
            s.deadline = None;
        });
    }

    fn is_cancelled(&self) -> bool {
        self.shared.state.read(|s| s.cancelled)
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_tokio_timer(shared: Arc<TokioTimerShared>, handler: TimerHandler) {
    loop {
        let (armed, cancelled) = shared.state.read(|s| {
            let armed = if s.suspended { None } else { s.deadline };
            (armed, s.cancelled)
        });
        if cancelled {
            break;
        }

        let Some(deadline) = armed else {
            shared.wake.notified().await;
            continue;
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                // the state may have changed while we slept
                let fire = shared.state.write(|s| {
                    let due = !s.cancelled && !s.suspended && s.deadline == Some(deadline);
                    if due {
                        s.deadline = None;
                    }
                    due
                });
                if fire {
                    handler();
                }
            }
            _ = shared.wake.notified() => {}
        }
    }
    trace!("timer task finished");
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// A single-threaded timer queue fired by explicit calls.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct RunLoop {
    shared: Arc<RunLoopShared>,
}

struct RunLoopShared {
    clock: Arc<dyn Clock>,
    timers: Locked<RunLoopTimers>,
}

#[derive(Default)]
struct RunLoopTimers {
    next_id: u64,
    entries: BTreeMap<u64, RunLoopEntry>,
}

struct RunLoopEntry {
    deadline: Option<DateTime<Utc>>,
    suspended: bool,
    firing: bool,
    handler: TimerHandler,
}

impl RunLoopEntry {
    fn due_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.suspended || self.firing {
            return None;
        }
        self.deadline.filter(|d| *d <= now)
    }
}

impl RunLoop {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(RunLoopShared {
                clock,
                timers: Locked::new(RunLoopTimers::default()),
            }),
        }
    }

    /// A run loop on the system wall clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Fire every timer whose deadline has passed, earliest first, and
    /// return how many fired. Handlers run without the queue lock held, so
    /// they may re-arm or cancel timers (including their own).
    pub fn run_pending(&self) -> usize {
        let now = self.shared.clock.now();
        let mut due = self.shared.timers.write(|t| {
            let mut due = Vec::new();
            for (id, entry) in t.entries.iter_mut() {
                if let Some(deadline) = entry.due_at(now) {
                    entry.deadline = None;
                    entry.firing = true;
                    due.push((deadline, *id, Arc::clone(&entry.handler)));
                }
            }
            due
        });
        due.sort_by_key(|(deadline, id, _)| (*deadline, *id));

        for (_, id, handler) in &due {
            handler();
            self.shared.timers.write(|t| {
                if let Some(entry) = t.entries.get_mut(id) {
                    entry.firing = false;
                }
            });
        }
        if !due.is_empty() {
            trace!(fired = due.len(), "run loop pass");
        }
        due.len()
    }

    /// Earliest deadline among armed, unsuspended timers.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.shared.timers.read(|t| {
            t.entries
                .values()
                .filter(|e| !e.suspended)
                .filter_map(|e| e.deadline)
                .min()
        })
    }

    /// Number of live (uncancelled) timers.
    pub fn timer_count(&self) -> usize {
        self.shared.timers.read(|t| t.entries.len())
    }

    /// Call [`run_pending`](Self::run_pending) every `tick` until `shutdown`
    /// broadcasts `true` or its sender goes away.
    pub async fn drive(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = tick.as_millis() as u64, "run loop started");
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_pending();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("run loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop")
            .field("timers", &self.timer_count())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext for RunLoop {
    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    fn create_timer(&self, handler: TimerHandler) -> Box<dyn Timer> {
        let id = self.shared.timers.write(|t| {
            let id = t.next_id;
            t.next_id += 1;
            t.entries.insert(
                id,
                RunLoopEntry {
                    deadline: None,
                    suspended: false,
                    firing: false,
                    handler,
                },
            );
            id
        });
        debug!(timer_id = id, "run loop timer created");
        Box::new(RunLoopTimer {
            id,
            shared: Arc::clone(&self.shared),
        })
    }
}

struct RunLoopTimer {
    id: u64,
    shared: Arc<RunLoopShared>,
}

impl RunLoopTimer {
    fn with_entry(&self, f: impl FnOnce(&mut RunLoopEntry)) {
        self.shared.timers.write(|t| {
            if let Some(entry) = t.entries.get_mut(&self.id) {
                f(entry);
            }
        });
    }
}

impl Timer for RunLoopTimer {
    fn schedule(&self, after: Interval) {
        let now = self.shared.clock.now();
        let deadline = after.max(Interval::ZERO).add_to(now);
        self.with_entry(|e| e.deadline = deadline);
    }

    fn disarm(&self) {
        self.with_entry(|e| e.deadline = None);
    }

    fn suspend(&self) {
        self.with_entry(|e| e.suspended = true);
    }

    fn resume(&self) {
        self.with_entry(|e| e.suspended = false);
    }

    fn cancel(&self) {
        // the handler is released outside the queue lock
        let removed = self.shared.timers.write(|t| t.entries.remove(&self.id));
        drop(removed);
    }

    fn is_cancelled(&self) -> bool {
        self.shared
            .timers
            .read(|t| !t.entries.contains_key(&self.id))
    }
}

impl Drop for RunLoopTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
