//! This module contains the cooperative cancellation support for the
//! engine.
//!
//! # Best-Effort Monitoring
//!
//! Cancellation is cooperative: the interpreter polls its watchdog between
//! store dequeues and between pipeline steps, never in the middle of a
//! step. A watchdog therefore bounds how much _additional_ work the engine
//! does after a stop is requested, not the latency of the stop itself;
//! solver queries in flight run to their own timeout.

use std::{
    fmt::Debug,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A dynamically dispatched [`Watchdog`] instance.
pub type DynWatchdog = Rc<dyn Watchdog>;

/// The interface to an object that can be polled to see if the engine needs
/// to abort exploration.
pub trait Watchdog
where
    Self: Debug,
{
    /// Checks if the engine should halt exploration and return an error.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of interpreter steps to run between polls.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// A [`Watchdog`] that never requests a stop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        // Large enough that the poll itself never shows up in a profile.
        1_000_000_000
    }
}

/// A [`Watchdog`] driven by a flag another thread can raise.
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    flag: Arc<AtomicBool>,
    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Constructs a watchdog wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            flag,
            poll_loop_iterations,
        }
    }

    /// Specifies the number of steps between polls.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

/// A [`Watchdog`] that requests a stop once a wall-clock deadline passes.
#[derive(Clone, Debug)]
pub struct TimeoutWatchdog {
    deadline: Instant,
    poll_loop_iterations: usize,
}

impl TimeoutWatchdog {
    /// Constructs a watchdog that stops the engine `budget` from now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        let deadline = Instant::now() + budget;
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            deadline,
            poll_loop_iterations,
        }
    }

    /// Specifies the number of steps between polls.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for TimeoutWatchdog {
    fn should_stop(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use crate::watchdog::{FlagWatchdog, LazyWatchdog, TimeoutWatchdog, Watchdog};

    #[test]
    fn lazy_watchdog_never_stops() {
        assert!(!LazyWatchdog.should_stop());
    }

    #[test]
    fn flag_watchdog_follows_its_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = FlagWatchdog::new(flag.clone());

        assert!(!watchdog.should_stop());
        flag.store(true, Ordering::Relaxed);
        assert!(watchdog.should_stop());
    }

    #[test]
    fn timeout_watchdog_stops_after_its_deadline() {
        let expired = TimeoutWatchdog::new(Duration::ZERO);
        assert!(expired.should_stop());

        let generous = TimeoutWatchdog::new(Duration::from_secs(3600));
        assert!(!generous.should_stop());
    }
}
