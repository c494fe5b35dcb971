//! Request pacing shared by all workers calling one provider.
//!
//! A `governor` direct limiter with a one-request burst: callers are spaced
//! `min_interval` apart. Workers are plain threads, so `wait` polls
//! `check()` and sleeps until the limiter's next slot.

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::fmt;
use std::time::Duration;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct RateLimiter {
    min_interval: Duration,
    // None when the interval is zero
    limiter: Option<DirectLimiter>,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval).map(governor::RateLimiter::direct);
        Self {
            min_interval,
            limiter,
            clock: DefaultClock::default(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until this caller may send its request.
    pub fn wait(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        while let Err(not_until) = limiter.check() {
            std::thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
