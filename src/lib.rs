//! Debounced callback invoker with safe cancellation.
//!
//! A [`Debouncer`] wraps a target operation; each call reschedules the target
//! to run after a quiet period, discarding the previously scheduled run and
//! its arguments. Runs are queued on a [`Scheduler`], by default the
//! single-threaded [`LocalScheduler`] event loop built on a hashed time wheel.

use std::{future::Future, time::Duration};

/// Wall-clock timer future, used to drive a [`LocalScheduler`] in real time.
pub trait Timer: Future {
    /// Create new timer.
    ///
    /// # Parameters
    /// * `duration` - Timer expiration interval
    fn new(duration: Duration) -> Self;
}

/// [`Timer`] created against an explicit timer service instead of the global one.
pub trait TimerWithContext: Timer {
    /// timer extra context parameter.
    type Context;
    /// Create new timer with context parameter
    ///
    /// # Parameters
    /// * `duration` - Timer expiration interval
    /// * `context` - See [`TimerWithContext::Context`]
    fn new_with_context<C>(duration: Duration, context: C) -> Self
    where
        C: AsMut<Self::Context>;
}

/// Hashed time wheel and the real-time [`Timer`] built on it
pub mod hashed;

mod config;
mod debounce;
mod error;
mod interval;
mod scheduler;

pub use config::*;
pub use debounce::*;
pub use error::*;
pub use interval::*;
pub use scheduler::*;
