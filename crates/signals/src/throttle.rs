//! Rate limiting for high-frequency warnings.
//!
//! Overload paths (queue drops, bus evictions, delivery failures) can fire
//! thousands of times per second. A [`LogThrottle`] lets one log line through
//! per quota period and reports how many were swallowed in between.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Type alias for the governor rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct LogThrottle {
    limiter: DirectLimiter,
    suppressed: AtomicU64,
}

impl LogThrottle {
    /// Allows `per_second` log lines per second (at least one).
    #[must_use]
    pub fn per_second(per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(swallowed_since_last)` if a log line may be written now.
    pub fn allow(&self) -> Option<u64> {
        if self.limiter.check().is_ok() {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

impl std::fmt::Debug for LogThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogThrottle")
            .field("suppressed", &self.suppressed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
