//! Request quota: how many requests a key may make per window.

use std::fmt;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Default number of requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 60;
/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Longest accepted window: 365 days.
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// A validated `(limit, window)` pair.
///
/// Both values are strictly positive and the window is at most
/// [`MAX_WINDOW_MS`]. The window has millisecond granularity;
/// sub-millisecond parts are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quota {
    limit: u64,
    window_ms: u64,
}

impl Quota {
    /// Create a quota of `limit` requests per `window`.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self::from_millis(limit, window_ms)
    }

    /// Create a quota of `limit` requests per `window_ms` milliseconds.
    pub fn from_millis(limit: u64, window_ms: u64) -> Result<Self> {
        if limit == 0 {
            return Err(TurnstileError::InvalidQuota(
                "limit must be greater than zero".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(TurnstileError::InvalidQuota(
                "window must be at least one millisecond".to_string(),
            ));
        }
        if window_ms > MAX_WINDOW_MS {
            return Err(TurnstileError::InvalidQuota(format!(
                "window must be at most {MAX_WINDOW_MS} milliseconds"
            )));
        }
        Ok(Self { limit, window_ms })
    }

    /// Shorthand for `limit` requests per minute.
    pub fn per_minute(limit: u64) -> Result<Self> {
        Self::from_millis(limit, 60_000)
    }

    /// Maximum requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            limit: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}ms", self.limit, self.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quota() {
        let quota = Quota::default();
        assert_eq!(quota.limit(), 60);
        assert_eq!(quota.window_ms(), 60_000);
        assert_eq!(quota.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let result = Quota::from_millis(0, 1000);
        assert!(matches!(result, Err(TurnstileError::InvalidQuota(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = Quota::from_millis(10, 0);
        assert!(matches!(result, Err(TurnstileError::InvalidQuota(_))));

        // Sub-millisecond windows truncate to zero
        let result = Quota::new(10, Duration::from_micros(500));
        assert!(matches!(result, Err(TurnstileError::InvalidQuota(_))));
    }

    #[test]
    fn test_oversized_window_rejected() {
        assert!(Quota::from_millis(1, MAX_WINDOW_MS).is_ok());

        let result = Quota::from_millis(1, MAX_WINDOW_MS + 1);
        assert!(matches!(result, Err(TurnstileError::InvalidQuota(_))));

        let result = Quota::new(1, Duration::MAX);
        assert!(matches!(result, Err(TurnstileError::InvalidQuota(_))));
    }

    #[test]
    fn test_quota_from_duration() {
        let quota = Quota::new(5, Duration::from_millis(1500)).unwrap();
        assert_eq!(quota.limit(), 5);
        assert_eq!(quota.window_ms(), 1500);
        assert_eq!(quota.to_string(), "5/1500ms");
    }

    #[test]
    fn test_per_minute() {
        let quota = Quota::per_minute(100).unwrap();
        assert_eq!(quota.window_ms(), 60_000);
        assert_eq!(quota.limit(), 100);
    }
}
