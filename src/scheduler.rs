//! Host timer facility: "run once after a duration" and "cancel a pending run".
//!
//! [`LocalScheduler`] is a single-threaded cooperative event loop. Tasks are
//! queued on a hashed time wheel and run one at a time by whoever drives the
//! loop, either in virtual time ([`LocalScheduler::turn`],
//! [`LocalScheduler::advance`]) or against the wall clock
//! ([`LocalScheduler::run_until_idle`]).

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
    task::Poll,
    time::{Duration, Instant},
};

use crate::{
    hashed::{ticks_for, TimeWheel},
    Timer,
};

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Timer facility a [`Debouncer`](crate::Debouncer) or
/// [`Interval`](crate::Interval) is built on.
pub trait Scheduler {
    /// Handle identifying one scheduled run.
    type Handle;

    /// Run `task` once after `delay`. The task must never run inline with
    /// this call, even for a zero delay.
    fn schedule(&self, delay: Duration, task: Task) -> Self::Handle;

    /// Cancel a pending run, dropping its task unexecuted.
    ///
    /// Returns `false` if the run already happened or was already cancelled.
    fn cancel(&self, handle: Self::Handle) -> bool;
}

/// Handle of a task scheduled on a [`LocalScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: usize,
}

struct Scheduled {
    slot: usize,
    task: Task,
}

/// Maps virtual ticks onto the wall clock while the loop runs in real time.
struct WallClock {
    start: Instant,
    base_ticks: u64,
    tick_duration: Duration,
}

impl WallClock {
    /// Whole ticks of wall-clock time passed.
    fn ticks(&self) -> u64 {
        let elapsed = self.start.elapsed().as_nanos() / self.tick_duration.as_nanos();

        self.base_ticks
            .saturating_add(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

struct SchedulerImpl {
    task_id_seq: usize,
    elapsed_ticks: u64,
    wheel: TimeWheel<usize>,
    tasks: HashMap<usize, Scheduled>,
    wall_clock: Option<WallClock>,
}

impl SchedulerImpl {
    /// Ticks the virtual clock trails the wall clock by, counting the
    /// current partial tick as a whole one.
    fn lag(&self) -> u64 {
        match &self.wall_clock {
            Some(clock) => (clock.ticks() + 1).saturating_sub(self.elapsed_ticks),
            None => 0,
        }
    }

    fn schedule(&mut self, ticks: u64, task: Task) -> TaskHandle {
        self.task_id_seq += 1;

        let id = self.task_id_seq;

        // Count the delay from the wall clock, not from a lagging virtual tick.
        let slot = self.wheel.add(ticks.saturating_add(self.lag()), id);

        self.tasks.insert(id, Scheduled { slot, task });

        TaskHandle { id }
    }

    fn cancel(&mut self, handle: TaskHandle) -> Option<Scheduled> {
        let scheduled = self.tasks.remove(&handle.id)?;

        self.wheel.remove(scheduled.slot, &handle.id);

        Some(scheduled)
    }

    fn tick(&mut self) -> Vec<usize> {
        self.elapsed_ticks += 1;

        match self.wheel.tick() {
            Poll::Ready(ids) => ids,
            Poll::Pending => vec![],
        }
    }
}

/// Cloneable handle to a single-threaded event loop.
///
/// Clones share the same queue. The type is `!Send`: tasks, and therefore
/// debounced targets, always run on the thread driving the loop.
#[derive(Clone)]
pub struct LocalScheduler {
    tick_duration: Duration,
    inner: Rc<RefCell<SchedulerImpl>>,
}

impl Default for LocalScheduler {
    /// 1ms resolution on a 1024 bucket wheel.
    fn default() -> Self {
        Self::new(1024, Duration::from_millis(1))
    }
}

impl LocalScheduler {
    /// Create event loop with a `step` bucket wheel advancing `tick_duration`
    /// per turn.
    pub fn new(step: u64, tick_duration: Duration) -> Self {
        let tick_duration = tick_duration.max(Duration::from_nanos(1));

        Self {
            tick_duration,
            inner: Rc::new(RefCell::new(SchedulerImpl {
                task_id_seq: 0,
                elapsed_ticks: 0,
                wheel: TimeWheel::new(step),
                tasks: HashMap::new(),
                wall_clock: None,
            })),
        }
    }

    /// Virtual time advanced per turn.
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Virtual time elapsed since the loop was created.
    pub fn now(&self) -> Duration {
        let ticks = self.inner.borrow().elapsed_ticks;

        let nanos = self.tick_duration.as_nanos() * u128::from(ticks);

        Duration::new(
            u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX),
            (nanos % 1_000_000_000) as u32,
        )
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Whether no task is waiting to run.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Advance the loop by one tick and run every task due on it.
    ///
    /// Returns the number of tasks run. Tasks run without any borrow of the
    /// loop held, so they may schedule or cancel other tasks; a task cancelled
    /// by an earlier task of the same tick is skipped. A panicking task
    /// unwinds out of this call.
    pub fn turn(&self) -> usize {
        let due = self.inner.borrow_mut().tick();

        let mut ran = 0;

        for id in due {
            let scheduled = self.inner.borrow_mut().tasks.remove(&id);

            if let Some(scheduled) = scheduled {
                log::trace!("run task {}", id);
                (scheduled.task)();
                ran += 1;
            }
        }

        ran
    }

    /// Advance the loop by `duration` worth of ticks, rounded down.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, duration: Duration) -> usize {
        let ticks = duration.as_nanos() / self.tick_duration.as_nanos();

        let mut ran = 0;

        for _ in 0..ticks {
            ran += self.turn();
        }

        ran
    }

    /// Drive the loop against the wall clock until no task is left.
    ///
    /// Sleeps one tick at a time on `T` and catches up on every tick that
    /// elapsed meanwhile. Tasks scheduled while the loop lags behind the wall
    /// clock count their delay from the wall clock, so a slow task or a late
    /// timer delays runs but never makes them early.
    pub async fn run_until_idle<T: Timer>(&self) -> usize {
        let _clock = WallClockGuard::start(self);

        let mut ran = 0;

        while !self.is_idle() {
            T::new(self.tick_duration).await;

            loop {
                let (elapsed, due) = {
                    let inner = self.inner.borrow();
                    let due = inner.wall_clock.as_ref().map_or(0, WallClock::ticks);
                    (inner.elapsed_ticks, due)
                };

                if elapsed >= due || self.is_idle() {
                    break;
                }

                ran += self.turn();
            }
        }

        ran
    }
}

/// Keeps the wall clock attached for the duration of [`LocalScheduler::run_until_idle`],
/// including when the future is dropped or a task panics.
struct WallClockGuard<'a> {
    scheduler: &'a LocalScheduler,
}

impl<'a> WallClockGuard<'a> {
    fn start(scheduler: &'a LocalScheduler) -> Self {
        let mut inner = scheduler.inner.borrow_mut();

        let base_ticks = inner.elapsed_ticks;

        inner.wall_clock = Some(WallClock {
            start: Instant::now(),
            base_ticks,
            tick_duration: scheduler.tick_duration,
        });

        drop(inner);

        Self { scheduler }
    }
}

impl Drop for WallClockGuard<'_> {
    fn drop(&mut self) {
        // Runs during unwinding too; must not panic on a held borrow.
        if let Ok(mut inner) = self.scheduler.inner.try_borrow_mut() {
            inner.wall_clock = None;
        }
    }
}

impl Scheduler for LocalScheduler {
    type Handle = TaskHandle;

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let ticks = ticks_for(delay, self.tick_duration);

        let handle = self.inner.borrow_mut().schedule(ticks, task);

        log::trace!("schedule task {} in {} ticks", handle.id, ticks);

        handle
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        // Dropped after the borrow ends: the task may own values whose
        // destructors reach back into this loop.
        let cancelled = self.inner.borrow_mut().cancel(handle);

        match cancelled {
            Some(_) => {
                log::trace!("cancel task {}", handle.id);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Rc::new(RefCell::new(vec![]));
        let log_task = log.clone();

        let make = move |name: &'static str| -> Task {
            let log = log_task.clone();
            Box::new(move || log.borrow_mut().push(name))
        };

        (log, make)
    }

    #[test]
    fn test_runs_after_delay() {
        let scheduler = LocalScheduler::default();
        let (log, task) = recorder();

        scheduler.schedule(Duration::from_millis(10), task("a"));

        assert_eq!(scheduler.advance(Duration::from_millis(9)), 0);
        assert!(log.borrow().is_empty());

        assert_eq!(scheduler.turn(), 1);
        assert_eq!(*log.borrow(), vec!["a"]);
        assert_eq!(scheduler.now(), Duration::from_millis(10));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_zero_delay_is_deferred() {
        let scheduler = LocalScheduler::default();
        let (log, task) = recorder();

        scheduler.schedule(Duration::ZERO, task("a"));

        assert!(log.borrow().is_empty());
        assert_eq!(scheduler.turn(), 1);
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn test_cancel() {
        let scheduler = LocalScheduler::default();
        let (log, task) = recorder();

        let handle = scheduler.schedule(Duration::from_millis(5), task("a"));

        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert_eq!(scheduler.pending(), 0);

        scheduler.advance(Duration::from_millis(20));

        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_cancel_fired_task() {
        let scheduler = LocalScheduler::default();
        let (_, task) = recorder();

        let handle = scheduler.schedule(Duration::from_millis(1), task("a"));

        scheduler.turn();

        assert!(!scheduler.cancel(handle));
    }

    #[test]
    fn test_task_cancels_sibling_on_same_tick() {
        let scheduler = LocalScheduler::default();
        let ran = Rc::new(Cell::new(0));
        let victim: Rc<Cell<Option<TaskHandle>>> = Rc::new(Cell::new(None));

        let canceller = {
            let scheduler = scheduler.clone();
            let victim = victim.clone();
            let ran = ran.clone();
            move || {
                ran.set(ran.get() + 1);
                if let Some(handle) = victim.take() {
                    scheduler.cancel(handle);
                }
            }
        };

        scheduler.schedule(Duration::from_millis(3), Box::new(canceller));
        let second = {
            let ran = ran.clone();
            scheduler.schedule(Duration::from_millis(3), Box::new(move || ran.set(ran.get() + 1)))
        };

        // Same tick; tasks run in scheduling order.
        victim.set(Some(second));

        assert_eq!(scheduler.advance(Duration::from_millis(3)), 1);

        assert_eq!(ran.get(), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_lagging_clock_delays_new_tasks() {
        let scheduler = LocalScheduler::default();
        let (log, task) = recorder();

        // Virtual time sits at zero while 50ms of wall-clock time passed.
        scheduler.inner.borrow_mut().wall_clock = Some(WallClock {
            start: Instant::now() - Duration::from_millis(50),
            base_ticks: 0,
            tick_duration: scheduler.tick_duration(),
        });

        scheduler.schedule(Duration::from_millis(30), task("a"));

        assert_eq!(scheduler.advance(Duration::from_millis(80)), 0);
        assert!(log.borrow().is_empty());

        assert_eq!(scheduler.advance(Duration::from_millis(10)), 1);
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn test_now_past_u32_ticks() {
        let scheduler = LocalScheduler::default();

        scheduler.inner.borrow_mut().elapsed_ticks = u64::from(u32::MAX) + 1_000;

        assert_eq!(
            scheduler.now(),
            Duration::from_millis(u64::from(u32::MAX) + 1_000)
        );
    }

    #[test]
    fn test_task_reschedules_itself() {
        let scheduler = LocalScheduler::default();
        let count = Rc::new(Cell::new(0));

        let inner_scheduler = scheduler.clone();
        let inner_count = count.clone();

        scheduler.schedule(
            Duration::from_millis(2),
            Box::new(move || {
                inner_count.set(inner_count.get() + 1);

                let count = inner_count.clone();
                inner_scheduler.schedule(
                    Duration::from_millis(2),
                    Box::new(move || count.set(count.get() + 1)),
                );
            }),
        );

        scheduler.advance(Duration::from_millis(2));
        assert_eq!(count.get(), 1);
        assert_eq!(scheduler.pending(), 1);

        scheduler.advance(Duration::from_millis(2));
        assert_eq!(count.get(), 2);
        assert!(scheduler.is_idle());
    }
}
