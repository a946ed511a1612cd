//! Retry cadence for the reconnect loop
//!
//! Connect failures are retried forever at a fixed interval. There is no
//! exponential growth and no attempt cap; a database that stays down simply
//! produces one failed attempt (and one log line) per interval.

use std::time::Duration;

/// Default pause between a failed connect and the next attempt
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed-interval retry policy.
///
/// # Example
///
/// ```
/// use dbwarden_connection::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay(), Duration::from_secs(5));
///
/// let fast = RetryPolicy::fixed(Duration::from_millis(250));
/// assert_eq!(fast.delay(), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
}

impl RetryPolicy {
    /// Retry after `delay`, clamped to at least 1ms so a dead database can't spin the loop
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay: delay.max(Duration::from_millis(1)),
        }
    }

    /// Build from a millisecond count, as found in settings files
    pub fn from_millis(ms: u64) -> Self {
        Self::fixed(Duration::from_millis(ms))
    }

    /// Delay before the next connect attempt
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}
