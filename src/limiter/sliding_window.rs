//! Sliding-window log rate limiter.
//!
//! Every admitted request appends its timestamp to the client's log. A
//! decision first drops timestamps older than the window, then admits only if
//! fewer than `max_requests` remain:
//!
//! ```text
//!            window
//!      ├──────────────────┤
//! ─────x───x──x─────x─────┼── now
//!      ↑ expired (dropped)   live: 3 → admit if max_requests > 3
//! ```
//!
//! A timestamp `t` is live while `now - t <= window`.
//!
//! # Locking
//!
//! A single mutex guards the whole map. It is held only for the
//! read-modify-write of one decision (or one eviction sweep), never across
//! request forwarding. Sharding the map per key would be a purely internal
//! change as long as each decision stays atomic for its key.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::{RateLimiter, WindowConfig};

/// Per-key timestamp logs in chronological order.
type RequestLog = HashMap<String, VecDeque<Instant>>;

/// Sliding-window log limiter.
///
/// Create one per service and share it behind an `Arc`; all access goes
/// through [`RateLimiter::allow`] so callers cannot bypass the lock.
pub struct SlidingWindowLimiter {
    config: WindowConfig,
    requests: Mutex<RequestLog>,
}

impl SlidingWindowLimiter {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Requests `key` could still make in the current window.
    ///
    /// Read-only: does not record anything or prune the stored log.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        let window = self.config.window();
        let live = self.requests.lock().get(key).map_or(0, |log| {
            log.iter()
                .filter(|&&t| now.saturating_duration_since(t) <= window)
                .count()
        });
        self.config
            .max_requests()
            .saturating_sub(u32::try_from(live).unwrap_or(u32::MAX))
    }

    /// Decide for `key` at the given instant.
    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let max_requests = self.config.max_requests() as usize;
        let window = self.config.window();
        let mut requests = self.requests.lock();

        let log = match requests.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            // Zero capacity never admits, so don't start tracking the key.
            Entry::Vacant(_) if max_requests == 0 => return false,
            Entry::Vacant(entry) => entry.insert(VecDeque::new()),
        };

        drop_expired(log, now, window);

        if log.len() >= max_requests {
            trace!(client_key = key, live = log.len(), "Window full, rejecting");
            return false;
        }

        log.push_back(now);
        true
    }

    /// Evict keys without live timestamps as of `now`.
    fn evict_at(&self, now: Instant) -> usize {
        let window = self.config.window();
        let mut requests = self.requests.lock();
        let before = requests.len();

        requests.retain(|_, log| {
            drop_expired(log, now, window);
            !log.is_empty()
        });

        before - requests.len()
    }
}

/// Pop timestamps from the front of `log` until the oldest one is live.
///
/// Timestamps are only ever appended at "now", so the log is sorted and the
/// expired ones are always a prefix.
fn drop_expired(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = log.front() {
        if now.saturating_duration_since(oldest) <= window {
            break;
        }
        log.pop_front();
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn limit(&self) -> u32 {
        self.config.max_requests()
    }

    fn window(&self) -> Duration {
        self.config.window()
    }

    fn evict_expired(&self) -> usize {
        self.evict_at(Instant::now())
    }

    fn tracked_keys(&self) -> usize {
        self.requests.lock().len()
    }
}
