//! Reconnection backoff policy

use std::time::Duration;

/// Default number of automatic reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay; attempt `n` waits `2^n` times this.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff with a hard attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `attempts` earlier failures.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether another automatic retry is allowed after `attempts` retries.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
