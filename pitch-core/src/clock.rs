//! # Clock Module
//!
//! Monotonic time sources and the fixed-rate deadline scheduler that paces
//! acquisition.
//!
//! The scheduler computes every deadline from the start of the frame
//! (`start + k * period`), so the overhead of polling the clock never
//! accumulates across a frame; the error of any single reading is bounded
//! by the jitter of one spin-wait.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest slice the inter-cycle pause sleeps before re-checking for
/// cancellation.
const IDLE_SLICE: Duration = Duration::from_millis(10);

/// A monotonic time source.
pub trait Clock {
    /// Time elapsed since the clock's origin. Never decreases.
    fn now(&self) -> Duration;

    /// Called once per poll iteration while busy-waiting for `deadline`.
    fn spin(&self, _deadline: Duration) {
        std::hint::spin_loop();
    }

    /// Blocks for roughly `duration`.
    fn idle(&self, duration: Duration);
}

/// Wall-clock time from `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn idle(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when it is polled or told to.
///
/// Each poll made while spinning advances time by `poll_cost`, emulating the
/// overhead of reading a real clock. With a zero poll cost a spin jumps
/// straight to the deadline. Used for replaying dumps faster than real time
/// and for testing the scheduler.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    now: Cell<Duration>,
    poll_cost: Duration,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_cost(poll_cost: Duration) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            poll_cost,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn spin(&self, deadline: Duration) {
        if self.poll_cost.is_zero() {
            self.now.set(self.now.get().max(deadline));
        } else {
            self.advance(self.poll_cost);
        }
    }

    fn idle(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Cooperative cancellation flag shared between the run loop and whoever
/// stops it (usually an interrupt handler).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Fixed-period deadline scheduler with additive deadlines.
///
/// The first deadline is one period after construction. Every call to
/// [`DeadlineScheduler::wait_next`] busy-waits for the pending deadline and
/// then moves it forward by exactly one period, independent of how late the
/// wait actually returned.
pub struct DeadlineScheduler<'a, C: Clock + ?Sized> {
    clock: &'a C,
    start: Duration,
    period: Duration,
    slot: u32,
}

impl<'a, C: Clock + ?Sized> DeadlineScheduler<'a, C> {
    pub fn new(clock: &'a C, period: Duration) -> Self {
        Self {
            start: clock.now(),
            clock,
            period,
            slot: 0,
        }
    }

    /// The deadline the next call to `wait_next` will wait for.
    pub fn next_deadline(&self) -> Duration {
        self.start + self.period * (self.slot + 1)
    }

    /// Spins until the next deadline and returns it. Returns `None` as soon
    /// as `cancel` is set, without waiting out the period.
    pub fn wait_next(&mut self, cancel: &CancelToken) -> Option<Duration> {
        let deadline = self.next_deadline();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if self.clock.now() >= deadline {
                break;
            }
            self.clock.spin(deadline);
        }
        self.slot += 1;
        Some(deadline)
    }
}

/// Sleeps for `duration` in short slices, returning early (with `false`) if
/// `cancel` is set.
pub fn idle_for<C: Clock + ?Sized>(clock: &C, duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = clock.now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = clock.now();
        if now >= deadline {
            return true;
        }
        clock.idle((deadline - now).min(IDLE_SLICE));
    }
}
