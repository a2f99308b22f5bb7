//! Per-client admission decisions.
//!
//! The request pipeline only ever talks to a [`RateLimiter`] trait object, so
//! the admission strategy can be swapped without touching the middleware:
//!
//! - [`SlidingWindowLimiter`]: sliding-window log (exact count of requests in
//!   the trailing window). This is the default.
//! - [`TokenBucketLimiter`]: GCRA token bucket via the Governor crate.
//!
//! Both are in-process, single-node limiters. State is lost on restart.
//!
//! # Eviction
//!
//! Admission is already correct through lazy filtering on every call, but keys
//! that stop sending traffic would otherwise stay in memory forever.
//! [`run_eviction`] is the periodic sweep that bounds memory; it is cancelled
//! through a [`CancellationToken`] so the limiter can be torn down
//! deterministically.

mod sliding_window;
mod token_bucket;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::metrics;

pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Error type for rate limiter construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The window must be a positive duration.
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,

    /// The strategy name is not one of the supported strategies.
    #[error("unknown rate limit strategy '{0}' (expected 'sliding_window' or 'token_bucket')")]
    UnknownStrategy(String),
}

/// Admission capability shared by all strategies.
///
/// Implementations must make [`allow`](RateLimiter::allow) atomic per key:
/// two concurrent callers must never both be admitted past the limit.
pub trait RateLimiter: Send + Sync {
    /// Decide whether a request from `key` is admitted right now.
    ///
    /// Admitted requests count against the key's quota; rejected ones do not.
    fn allow(&self, key: &str) -> bool;

    /// Maximum admitted requests per window.
    fn limit(&self) -> u32;

    /// Length of the window the limit applies to.
    fn window(&self) -> Duration;

    /// Drop state for keys that no longer hold any live requests.
    ///
    /// Returns the number of keys removed (best effort for strategies whose
    /// store cannot report it).
    fn evict_expired(&self) -> usize;

    /// Number of client keys currently tracked.
    fn tracked_keys(&self) -> usize;
}

/// Immutable limiter parameters: at most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    max_requests: u32,
    window: Duration,
}

impl WindowConfig {
    /// Create a window configuration.
    ///
    /// `max_requests = 0` is valid and means every request is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::ZeroWindow`] if `window` is zero.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Available admission strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Sliding-window log (exact).
    #[default]
    SlidingWindow,
    /// GCRA token bucket (approximate, constant memory per key).
    TokenBucket,
}

impl FromStr for Strategy {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding_window" | "sliding-window" => Ok(Strategy::SlidingWindow),
            "token_bucket" | "token-bucket" => Ok(Strategy::TokenBucket),
            other => Err(RateLimitError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::SlidingWindow => write!(f, "sliding_window"),
            Strategy::TokenBucket => write!(f, "token_bucket"),
        }
    }
}

/// Build a shared limiter for the given strategy.
pub fn build_limiter(strategy: Strategy, config: WindowConfig) -> Arc<dyn RateLimiter> {
    match strategy {
        Strategy::SlidingWindow => Arc::new(SlidingWindowLimiter::new(config)),
        Strategy::TokenBucket => Arc::new(TokenBucketLimiter::new(config)),
    }
}

/// Floor applied to the sweep period passed to [`run_eviction`].
pub const MIN_EVICTION_PERIOD: Duration = Duration::from_millis(1);

/// Periodically evict stale keys until `cancel` fires.
///
/// The first sweep happens one `period` after start. A `period` below
/// [`MIN_EVICTION_PERIOD`] is raised to it. `name` labels the limiter in
/// logs and metrics.
pub async fn run_eviction(
    name: &'static str,
    limiter: Arc<dyn RateLimiter>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period.max(MIN_EVICTION_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip the first immediate tick

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(limiter = name, "Eviction task received cancellation signal");
                break;
            }
            _ = ticker.tick() => {
                let removed = limiter.evict_expired();
                let remaining = limiter.tracked_keys();
                metrics::set_tracked_keys(name, remaining);
                if removed > 0 {
                    debug!(limiter = name, removed, remaining, "Evicted idle client keys");
                } else {
                    trace!(limiter = name, remaining, "Eviction sweep found nothing to evict");
                }
            }
        }
    }

    debug!(limiter = name, "Eviction task shutting down");
}
