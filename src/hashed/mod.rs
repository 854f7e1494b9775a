use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    task::{Poll, Waker},
    time::Duration,
};

mod timewheel;
pub use timewheel::*;

/// Convert `duration` into whole ticks of `tick_duration`, rounding up.
///
/// Never returns zero, so a timer is always at least one tick away.
pub fn ticks_for(duration: Duration, tick_duration: Duration) -> u64 {
    let tick = tick_duration.as_nanos().max(1);

    let ticks = (duration.as_nanos() + tick - 1) / tick;

    ticks.clamp(1, u64::MAX as u128) as u64
}

/// Real-time timer service: a background thread ticks a hashed time wheel and
/// wakes the [`Timeout`] futures that expire.
#[derive(Clone)]
pub struct TimerExecutor {
    tick_duration: Duration,
    inner: Arc<Mutex<TimerExecutorImpl>>,
}

struct TimerExecutorImpl {
    timer_id_seq: usize,
    wheel: TimeWheel<usize>,
    slots: HashMap<usize, usize>,
    wakers: HashMap<usize, Waker>,
    fired: HashSet<usize>,
}

impl TimerExecutorImpl {
    fn new(step: u64) -> Self {
        Self {
            timer_id_seq: 0,
            wheel: TimeWheel::new(step),
            slots: Default::default(),
            wakers: Default::default(),
            fired: Default::default(),
        }
    }

    fn create_timer(&mut self, ticks: u64) -> usize {
        self.timer_id_seq += 1;

        let timer = self.timer_id_seq;

        let slot = self.wheel.add(ticks, timer);

        self.slots.insert(timer, slot);

        timer
    }

    fn poll(&mut self, timer: usize, waker: &Waker) -> Poll<()> {
        if self.fired.remove(&timer) {
            Poll::Ready(())
        } else {
            log::trace!("register timer {} waker", timer);
            self.wakers.insert(timer, waker.clone());
            Poll::Pending
        }
    }

    fn cancel(&mut self, timer: usize) {
        if let Some(slot) = self.slots.remove(&timer) {
            log::trace!("cancel timer {}", timer);
            self.wheel.remove(slot, &timer);
        }

        self.wakers.remove(&timer);
        self.fired.remove(&timer);
    }

    fn tick(&mut self) {
        if let Poll::Ready(timers) = self.wheel.tick() {
            log::trace!("ready timers {:?}", timers);

            for timer in timers {
                self.slots.remove(&timer);
                self.fired.insert(timer);

                if let Some(waker) = self.wakers.remove(&timer) {
                    waker.wake();
                }
            }
        }
    }
}

fn lock(inner: &Mutex<TimerExecutorImpl>) -> MutexGuard<'_, TimerExecutorImpl> {
    // The guarded state stays consistent across a panicking waker.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TimerExecutor {
    /// Create executor with a `step` bucket wheel advanced every `tick_duration`.
    pub fn new(step: u64, tick_duration: Duration) -> Self {
        let inner: Arc<Mutex<TimerExecutorImpl>> =
            Arc::new(Mutex::new(TimerExecutorImpl::new(step)));

        let inner_tick = inner.clone();

        std::thread::spawn(move || {
            // When no other strong reference is alive, stop tick thread
            while Arc::strong_count(&inner_tick) > 1 {
                lock(&inner_tick).tick();

                std::thread::sleep(tick_duration);
            }
        });

        Self {
            inner,
            tick_duration,
        }
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Create a new timeout future instance.
    pub fn timeout(&self, duration: Duration) -> Timeout {
        let ticks = ticks_for(duration, self.tick_duration);

        let timer_id = lock(&self.inner).create_timer(ticks);

        Timeout {
            timer_id,
            executor: self.inner.clone(),
        }
    }
}

/// Future resolved once its duration elapsed on the owning [`TimerExecutor`].
///
/// Dropping an unresolved timeout removes it from the wheel.
pub struct Timeout {
    timer_id: usize,
    executor: Arc<Mutex<TimerExecutorImpl>>,
}

impl std::future::Future for Timeout {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        lock(&self.executor).poll(self.timer_id, cx.waker())
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        lock(&self.executor).cancel(self.timer_id);
    }
}

impl crate::Timer for Timeout {
    fn new(duration: Duration) -> Self {
        global_timer_executor().timeout(duration)
    }
}

impl crate::TimerWithContext for Timeout {
    type Context = TimerExecutor;
    fn new_with_context<C>(duration: Duration, mut context: C) -> Self
    where
        C: AsMut<Self::Context>,
    {
        context.as_mut().timeout(duration)
    }
}

impl AsMut<TimerExecutor> for TimerExecutor {
    fn as_mut(&mut self) -> &mut TimerExecutor {
        self
    }
}

/// Accesss global static timer executor instance
pub fn global_timer_executor() -> &'static TimerExecutor {
    use once_cell::sync::OnceCell;

    static INSTANCE: OnceCell<TimerExecutor> = OnceCell::new();

    INSTANCE.get_or_init(|| TimerExecutor::new(3600, Duration::from_millis(1)))
}
