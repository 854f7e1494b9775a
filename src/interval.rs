use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
    time::Duration,
};

use crate::{DebounceError, Result, Scheduler};

struct Ticker<S: Scheduler> {
    period: Duration,
    scheduler: S,
    target: RefCell<Box<dyn FnMut()>>,
    handle: RefCell<Option<S::Handle>>,
    fired: Cell<u64>,
}

impl<S> Ticker<S>
where
    S: Scheduler + 'static,
{
    fn arm(self: &Rc<Self>) {
        let ticker = Rc::downgrade(self);

        let handle = self.scheduler.schedule(
            self.period,
            Box::new(move || {
                if let Some(ticker) = ticker.upgrade() {
                    ticker.fire();
                }
            }),
        );

        *self.handle.borrow_mut() = Some(handle);
    }

    fn fire(self: &Rc<Self>) {
        // Re-arm first so the target can stop the interval from inside.
        self.arm();

        self.fired.set(self.fired.get() + 1);

        log::debug!("interval fired {} times", self.fired.get());

        let mut target = self.target.borrow_mut();

        (*target)();
    }
}

/// Repeating timer: runs its target every `period` until stopped or dropped.
pub struct Interval<S>
where
    S: Scheduler + 'static,
{
    ticker: Rc<Ticker<S>>,
}

impl<S> Interval<S>
where
    S: Scheduler + 'static,
{
    /// Start running `target` every `period`, first run one period from now.
    ///
    /// # Errors
    ///
    /// [`DebounceError::Configuration`] on a zero `period`.
    pub fn start<F>(scheduler: S, period: Duration, target: F) -> Result<Self>
    where
        F: FnMut() + 'static,
    {
        if period.is_zero() {
            return Err(DebounceError::Configuration(
                "interval period must be greater than zero".to_owned(),
            ));
        }

        let ticker = Rc::new(Ticker {
            period,
            scheduler,
            target: RefCell::new(Box::new(target)),
            handle: RefCell::new(None),
            fired: Cell::new(0),
        });

        ticker.arm();

        Ok(Self { ticker })
    }

    /// Time between runs.
    pub fn period(&self) -> Duration {
        self.ticker.period
    }

    /// Number of times the target ran.
    pub fn fired(&self) -> u64 {
        self.ticker.fired.get()
    }

    /// Whether a next run is scheduled.
    pub fn is_running(&self) -> bool {
        self.ticker.handle.borrow().is_some()
    }

    /// Cancel the next run. Idempotent.
    pub fn stop(&self) {
        let handle = self.ticker.handle.replace(None);

        if let Some(handle) = handle {
            log::debug!("stop interval");
            self.ticker.scheduler.cancel(handle);
        }
    }
}

impl<S> Drop for Interval<S>
where
    S: Scheduler + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S> fmt::Debug for Interval<S>
where
    S: Scheduler + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interval")
            .field("period", &self.ticker.period)
            .field("fired", &self.fired())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalScheduler;

    #[test]
    fn test_fires_every_period() {
        let scheduler = LocalScheduler::default();
        let count = Rc::new(Cell::new(0));

        let sink = count.clone();
        let interval = Interval::start(scheduler.clone(), Duration::from_millis(100), move || {
            sink.set(sink.get() + 1)
        })
        .unwrap();

        scheduler.advance(Duration::from_millis(99));
        assert_eq!(count.get(), 0);

        scheduler.advance(Duration::from_millis(401));
        assert_eq!(count.get(), 5);
        assert_eq!(interval.fired(), 5);
        assert!(interval.is_running());
    }

    #[test]
    fn test_stop() {
        let scheduler = LocalScheduler::default();

        let interval = Interval::start(scheduler.clone(), Duration::from_millis(10), || {}).unwrap();

        scheduler.advance(Duration::from_millis(30));
        interval.stop();
        interval.stop();

        assert!(!interval.is_running());
        assert_eq!(scheduler.pending(), 0);

        scheduler.advance(Duration::from_millis(100));
        assert_eq!(interval.fired(), 3);
    }

    #[test]
    fn test_drop_stops() {
        let scheduler = LocalScheduler::default();

        let interval = Interval::start(scheduler.clone(), Duration::from_millis(10), || {}).unwrap();
        drop(interval);

        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_reject_zero_period() {
        let scheduler = LocalScheduler::default();

        let result = Interval::start(scheduler, Duration::ZERO, || {});

        assert!(matches!(result, Err(DebounceError::Configuration(_))));
    }
}
