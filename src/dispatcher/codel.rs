//! CoDel (controlled delay) load shedding for a worker pool.
//!
//! Tracks the minimum queueing delay observed during each interval.  If
//! that minimum stayed above the target for a whole interval, the queue
//! is standing rather than bursting, and the pool is overloaded for the
//! next interval.  While overloaded, tasks that waited longer than twice
//! the target are shed.
//!
//! ```text
//!   interval n            interval n+1
//! ├──────────────────┼──────────────────┤
//!   min delay > 5ms  ──▶ overloaded: shed tasks with delay > 10ms
//! ```

use std::time::{Duration, Instant};

pub const DEFAULT_TARGET: Duration = Duration::from_millis(5);
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct Codel {
    target: Duration,
    interval: Duration,
    interval_end: Instant,
    min_delay: Duration,
    reset_delay: bool,
    overloaded: bool,
}

impl Codel {
    pub fn new(now: Instant) -> Self {
        Self::with_params(DEFAULT_TARGET, DEFAULT_INTERVAL, now)
    }

    pub fn with_params(target: Duration, interval: Duration, now: Instant) -> Self {
        Self {
            target,
            interval,
            interval_end: now + interval,
            min_delay: Duration::ZERO,
            reset_delay: true,
            overloaded: false,
        }
    }

    /// Feed the queue delay of a task about to run; `true` means shed it.
    pub fn should_shed(&mut self, delay: Duration, now: Instant) -> bool {
        if now > self.interval_end {
            self.reset_delay = true;
            self.interval_end = now + self.interval;
            self.overloaded = self.min_delay > self.target;
        }

        if self.reset_delay {
            self.reset_delay = false;
            self.min_delay = delay;
        } else if delay < self.min_delay {
            self.min_delay = delay;
        }

        self.overloaded && delay > self.slough_timeout()
    }

    pub fn is_overloaded(&self) -> bool {
        self.overloaded
    }

    /// Minimum delay of the current interval as a percentage of the
    /// slough timeout, capped at 100.
    pub fn load(&self) -> u8 {
        let slough = self.slough_timeout().as_nanos().max(1);
        (self.min_delay.as_nanos() * 100 / slough).min(100) as u8
    }

    fn slough_timeout(&self) -> Duration {
        self.target * 2
    }
}
