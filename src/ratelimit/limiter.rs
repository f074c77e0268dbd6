//! Core rate limiter implementation.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::entry::RateLimitEntry;
use super::quota::Quota;
use super::store::{ShardedStore, Store};

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Requests left in the current window for this key
    pub remaining: u64,
    /// The limit the request was checked against
    pub limit: u64,
    /// Epoch milliseconds at which the key's current window ends
    pub reset_at_ms: u64,
}

impl Decision {
    fn from_entry(entry: RateLimitEntry, limit: u64) -> Self {
        if entry.count > limit {
            Self {
                admitted: false,
                remaining: 0,
                limit,
                reset_at_ms: entry.reset_at_ms,
            }
        } else {
            Self {
                admitted: true,
                remaining: limit - entry.count,
                limit,
                reset_at_ms: entry.reset_at_ms,
            }
        }
    }
}

/// Fixed-window request limiter keyed by caller identity.
///
/// Each key gets a counter that starts with its first request and lasts one
/// window. Requests past the limit are rejected until the window ends; the
/// next request after that opens a new window. Rejected requests still count.
///
/// The limiter is cheap to share behind an `Arc`. State lives in the injected
/// [`Store`]; nothing is global.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    default_quota: Quota,
}

impl RateLimiter {
    /// Create a limiter with a sharded store, the system clock and the
    /// default quota of 60 requests per minute.
    pub fn new() -> Self {
        Self::with_parts(Arc::new(ShardedStore::new()), Arc::new(SystemClock))
    }

    /// Create a limiter over an explicit store and clock.
    pub fn with_parts(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_quota: Quota::default(),
        }
    }

    /// Replace the quota used by [`RateLimiter::check_default`].
    pub fn with_default_quota(mut self, quota: Quota) -> Self {
        self.default_quota = quota;
        self
    }

    /// The quota used by [`RateLimiter::check_default`].
    pub fn default_quota(&self) -> Quota {
        self.default_quota
    }

    /// Count a request from `key` against `quota` and decide whether to admit it.
    ///
    /// The window length only matters when this call opens a new window; an
    /// existing window keeps the end time it was created with. The limit is
    /// always the one passed here.
    pub fn check(&self, key: &str, quota: Quota) -> Decision {
        let now_ms = self.clock.now_ms();
        let entry = self.store.hit(key, now_ms, quota.window_ms());
        let decision = Decision::from_entry(entry, quota.limit());

        trace!(
            key = %key,
            count = entry.count,
            limit = quota.limit(),
            remaining = decision.remaining,
            "Checked rate limit"
        );

        if entry.count == 1 {
            debug!(key = %key, quota = %quota, reset_at_ms = entry.reset_at_ms, "Opened rate limit window");
        } else if !decision.admitted {
            debug!(
                key = %key,
                count = entry.count,
                limit = quota.limit(),
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Check `key` against the default quota.
    pub fn check_default(&self, key: &str) -> Decision {
        self.check(key, self.default_quota)
    }

    /// Drop every entry whose window has ended. Returns how many were removed.
    ///
    /// Not needed for correct decisions; it bounds memory for keys that
    /// stopped sending requests.
    pub fn sweep(&self) -> usize {
        let removed = self.store.remove_expired(self.clock.now_ms());
        if removed > 0 {
            debug!(removed = removed, remaining = self.store.len(), "Swept expired rate limit entries");
        }
        removed
    }

    /// Current state for `key`, if it is tracked.
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.store.get(key)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Current time according to the limiter's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_quota", &self.default_quota)
            .field("tracked_keys", &self.store.len())
            .finish()
    }
}
