//! Per-key fixed-window counter state.

/// Counter state for a single key.
///
/// `count` includes rejected attempts. Once `now >= reset_at_ms` the entry
/// is expired: the next hit replaces it and a sweep may remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests observed in the current window
    pub count: u64,
    /// Epoch milliseconds at which the current window ends
    pub reset_at_ms: u64,
}

impl RateLimitEntry {
    /// Open a new window at `now_ms` holding the first request.
    pub fn new(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_at_ms: now_ms.saturating_add(window_ms),
        }
    }

    /// Whether the window has ended.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }

    /// Record one request: renew the window if it has ended, otherwise count
    /// the request against the current one.
    pub fn hit(&mut self, now_ms: u64, window_ms: u64) {
        if self.is_expired(now_ms) {
            *self = Self::new(now_ms, window_ms);
        } else {
            self.count = self.count.saturating_add(1);
        }
    }

    /// Milliseconds left in the window, zero once expired.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms)
    }
}
