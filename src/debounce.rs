use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use crate::{DebounceConfig, DebounceError, LocalScheduler, Result, Scheduler};

/// Observable lifecycle state of a [`Debouncer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    /// No run is pending.
    Idle,
    /// Exactly one run of the target is pending.
    Scheduled,
    /// Terminal: the debouncer no longer accepts calls.
    Disposed,
}

enum Pending<H> {
    Idle,
    Scheduled(H),
    Disposed,
}

impl<H> Pending<H> {
    fn state(&self) -> DebounceState {
        match self {
            Pending::Idle => DebounceState::Idle,
            Pending::Scheduled(_) => DebounceState::Scheduled,
            Pending::Disposed => DebounceState::Disposed,
        }
    }
}

struct Shared<A, H> {
    target: RefCell<Box<dyn FnMut(A)>>,
    pending: RefCell<Pending<H>>,
}

impl<A, H> Shared<A, H> {
    fn fire(&self, args: A) {
        // The handle being released is the one that just fired.
        if let Pending::Disposed = self.pending.replace(Pending::Idle) {
            *self.pending.borrow_mut() = Pending::Disposed;
            return;
        }

        log::debug!("quiet period elapsed, invoke target");

        let mut target = self.target.borrow_mut();

        (*target)(args);
    }
}

/// Debounced invoker.
///
/// Wraps a target operation. Every [`call`](Debouncer::call) cancels the run
/// scheduled by the previous call, if any, and schedules the target to run with
/// the new arguments once the quiet period elapsed. Only the last call of a
/// burst ever reaches the target.
///
/// `A` is the argument list handed to the target, captured by value on each
/// call; use a tuple for several arguments.
///
/// Dropping the debouncer disposes it, so a run never fires against a torn
/// down owner.
///
/// ```
/// use std::{cell::RefCell, rc::Rc, time::Duration};
/// use async_debounce_rs::{Debouncer, LocalScheduler};
///
/// let scheduler = LocalScheduler::default();
/// let seen = Rc::new(RefCell::new(vec![]));
///
/// let sink = seen.clone();
/// let search = Debouncer::create(
///     scheduler.clone(),
///     move |term: String| sink.borrow_mut().push(term),
///     Some(300.0),
/// )
/// .unwrap();
///
/// search.call("r".to_owned()).unwrap();
/// search.call("ru".to_owned()).unwrap();
/// search.call("rust".to_owned()).unwrap();
///
/// scheduler.advance(Duration::from_millis(300));
///
/// assert_eq!(*seen.borrow(), vec!["rust".to_owned()]);
/// ```
pub struct Debouncer<A: 'static, S: Scheduler = LocalScheduler>
where
    S::Handle: 'static,
{
    config: DebounceConfig,
    scheduler: S,
    shared: Rc<Shared<A, S::Handle>>,
}

impl<A: 'static, S: Scheduler> Debouncer<A, S>
where
    S::Handle: 'static,
{
    /// Create debouncer with the default 500ms quiet period.
    pub fn new<F>(scheduler: S, target: F) -> Self
    where
        F: FnMut(A) + 'static,
    {
        Self::with_config(scheduler, target, DebounceConfig::default())
    }

    /// Create debouncer from a millisecond delay, `None` meaning the default.
    ///
    /// # Errors
    ///
    /// [`DebounceError::Configuration`] if `delay_ms` is negative, NaN or
    /// infinite.
    pub fn create<F>(scheduler: S, target: F, delay_ms: Option<f64>) -> Result<Self>
    where
        F: FnMut(A) + 'static,
    {
        let config = DebounceConfig::from_optional_millis(delay_ms)?;

        Ok(Self::with_config(scheduler, target, config))
    }

    /// Create debouncer from an already validated config.
    pub fn with_config<F>(scheduler: S, target: F, config: DebounceConfig) -> Self
    where
        F: FnMut(A) + 'static,
    {
        Self {
            config,
            scheduler,
            shared: Rc::new(Shared {
                target: RefCell::new(Box::new(target)),
                pending: RefCell::new(Pending::Idle),
            }),
        }
    }

    /// Quiet period.
    pub fn delay(&self) -> Duration {
        self.config.delay
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DebounceState {
        self.shared.pending.borrow().state()
    }

    /// Whether a run of the target is outstanding.
    pub fn is_pending(&self) -> bool {
        self.state() == DebounceState::Scheduled
    }

    /// Schedule the target to run with `args` after the quiet period,
    /// superseding the previously scheduled run.
    ///
    /// Never blocks and never runs the target inline, even with a zero delay.
    ///
    /// # Errors
    ///
    /// [`DebounceError::Disposed`] once [`dispose`](Debouncer::dispose) was
    /// called; nothing is scheduled then.
    pub fn call(&self, args: A) -> Result<()> {
        match self.shared.pending.replace(Pending::Idle) {
            Pending::Disposed => {
                *self.shared.pending.borrow_mut() = Pending::Disposed;
                return Err(DebounceError::Disposed);
            }
            Pending::Scheduled(handle) => {
                log::debug!("supersede pending run");
                self.scheduler.cancel(handle);
            }
            Pending::Idle => {}
        }

        let shared: Weak<Shared<A, S::Handle>> = Rc::downgrade(&self.shared);

        let handle = self.scheduler.schedule(
            self.config.delay,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.fire(args);
                }
            }),
        );

        log::debug!("schedule run in {:?}", self.config.delay);

        match self.shared.pending.replace(Pending::Scheduled(handle)) {
            // A destructor of the superseded arguments called back into us.
            Pending::Scheduled(stale) => {
                self.scheduler.cancel(stale);
            }
            Pending::Disposed => {
                self.dispose();
            }
            Pending::Idle => {}
        }

        Ok(())
    }

    /// Cancel the pending run, if any, and refuse further calls.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        match self.shared.pending.replace(Pending::Disposed) {
            Pending::Scheduled(handle) => {
                log::debug!("dispose, cancel pending run");
                self.scheduler.cancel(handle);
            }
            Pending::Idle => {
                log::debug!("dispose");
            }
            Pending::Disposed => {}
        }
    }
}

impl<A: 'static, S: Scheduler> Drop for Debouncer<A, S>
where
    S::Handle: 'static,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<A: 'static, S: Scheduler> fmt::Debug for Debouncer<A, S>
where
    S::Handle: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.config.delay)
            .field("state", &self.state())
            .finish()
    }
}
