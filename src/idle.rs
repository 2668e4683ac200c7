//! # Idle Backoff Controller
//!
//! When a full sweep over every channel yields nothing, the aggregator parks
//! for `idle_ns` instead of spinning. Reading the clock and printing a window
//! cost far more than a park, so the controller decides after how many idle
//! parks the clock is consulted again.
//!
//! ## Control loop
//!
//! - Each idle tick parks once and bumps `idle_count` and `total_count`.
//! - Once `idle_count` exceeds `elastic_count` the caller reads the clock.
//! - Interval elapsed: the window is printed and
//!   `elastic_count = total_count * interval / elapsed`, steering the next
//!   check towards the next interval boundary.
//! - Interval not yet elapsed:
//!   `elastic_count = max(min_idle_count, ratio * (interval - elapsed))`.
//!
//! `ratio` is the number of idle parks per millisecond and `min_idle_count`
//! is the park count of 1/50th of an interval.
//!
//! Time comes from a [`Clock`] so the loop can be driven without real sleeps.

use crate::config::{defaults, TimeUnit};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic run time and of the idle park
pub trait Clock: Send + Sync {
    /// Current time in ticks of the run's unit
    fn now(&self) -> u64;

    /// Block the calling thread for about `nanos` nanoseconds
    fn park(&self, nanos: u64);
}

/// Monotonic clock anchored at its creation
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    unit: TimeUnit,
}

impl SystemClock {
    pub fn new(unit: TimeUnit) -> Self {
        Self {
            origin: Instant::now(),
            unit,
        }
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.unit.from_duration(self.origin.elapsed())
    }

    fn park(&self, nanos: u64) {
        std::thread::park_timeout(Duration::from_nanos(nanos));
    }
}

/// Hand-driven clock; each park advances time by a fixed step
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    step_per_park: u64,
    parks: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64, step_per_park: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step_per_park,
            parks: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set(&self, ticks: u64) {
        self.now.store(ticks, Ordering::SeqCst);
    }

    /// Number of parks performed so far
    pub fn parks(&self) -> u64 {
        self.parks.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn park(&self, _nanos: u64) {
        self.parks.fetch_add(1, Ordering::SeqCst);
        self.now.fetch_add(self.step_per_park, Ordering::SeqCst);
        std::thread::yield_now();
    }
}

/// Adaptive count of idle parks between clock reads
#[derive(Debug, Clone)]
pub struct IdleController {
    window_interval_ms: u64,
    idle_ns: u64,
    count_ratio: f64,
    min_idle_count: u64,
    elastic_count: u64,
    idle_count: u64,
    total_count: u64,
}

impl IdleController {
    pub fn new(window_interval_ms: u64, idle_ns: u64) -> Self {
        let idle_ns = idle_ns.max(1);
        let count_ratio = defaults::NS_PER_MS as f64 / idle_ns as f64;
        let min_wait_ms = window_interval_ms as f64 / 50.0;
        let min_idle_count = (count_ratio * min_wait_ms) as u64;
        Self {
            window_interval_ms,
            idle_ns,
            count_ratio,
            min_idle_count,
            elastic_count: min_idle_count,
            idle_count: 0,
            total_count: 0,
        }
    }

    /// Park once and report whether the clock should be consulted
    pub fn wait_check(&mut self, clock: &dyn Clock) -> bool {
        clock.park(self.idle_ns);
        self.count_tick()
    }

    /// Bookkeeping half of an idle tick
    pub fn count_tick(&mut self) -> bool {
        self.idle_count += 1;
        self.total_count += 1;
        self.idle_count > self.elastic_count
    }

    /// Restart the idle count; called whenever the window is reset
    pub fn reset(&mut self) {
        self.idle_count = 0;
    }

    /// Interval not yet over: wait in proportion to the remaining time
    pub fn update_elastic(&mut self, elapsed_ms: u64) {
        let remaining = self.window_interval_ms.saturating_sub(elapsed_ms);
        self.elastic_count = ((self.count_ratio * remaining as f64) as u64).max(self.min_idle_count);
        self.idle_count = 0;
    }

    /// Interval over: recalibrate from the parks observed during it
    pub fn set_elastic(&mut self, elapsed_ms: u64) {
        self.elastic_count = self.total_count * self.window_interval_ms / elapsed_ms.max(1);
        self.total_count = 0;
    }

    pub fn elastic_count(&self) -> u64 {
        self.elastic_count
    }

    pub fn min_idle_count(&self) -> u64 {
        self.min_idle_count
    }

    pub fn idle_count(&self) -> u64 {
        self.idle_count
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }
}
