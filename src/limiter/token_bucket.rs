//! Token bucket limiter built on Governor's GCRA implementation.
//!
//! Each key holds a bucket of `max_requests` cells refilled at one cell per
//! `window / max_requests`. Unlike the sliding-window log this keeps constant
//! memory per key, but a client that paces its requests can exceed
//! `max_requests` within any single trailing window by up to one bucket.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorRateLimiter};

use super::{RateLimiter, WindowConfig};

/// Keyed GCRA limiter with `String` keys (DashMap-backed state store).
type KeyedLimiter = GovernorRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Shortest replenish interval Governor accepts.
const MIN_REPLENISH_PERIOD: Duration = Duration::from_nanos(1);

pub struct TokenBucketLimiter {
    config: WindowConfig,
    /// `None` when the capacity is zero: nothing is ever admitted.
    limiter: Option<KeyedLimiter>,
}

impl TokenBucketLimiter {
    pub fn new(config: WindowConfig) -> Self {
        // Windows shorter than `max_requests` nanoseconds would divide to zero.
        let limiter = NonZeroU32::new(config.max_requests()).and_then(|burst| {
            let period = (config.window() / burst.get()).max(MIN_REPLENISH_PERIOD);
            Quota::with_period(period)
                .map(|quota| GovernorRateLimiter::keyed(quota.allow_burst(burst)))
        });

        Self { config, limiter }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, key: &str) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check_key(&key.to_string()).is_ok(),
            None => false,
        }
    }

    fn limit(&self) -> u32 {
        self.config.max_requests()
    }

    fn window(&self) -> Duration {
        self.config.window()
    }

    fn evict_expired(&self) -> usize {
        let Some(limiter) = &self.limiter else {
            return 0;
        };
        let before = limiter.len();
        limiter.retain_recent();
        limiter.shrink_to_fit();
        before.saturating_sub(limiter.len())
    }

    fn tracked_keys(&self) -> usize {
        self.limiter.as_ref().map_or(0, |limiter| limiter.len())
    }
}
