//! Retry schedule for failed deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// How often and how soon a failed entry is retried.
///
/// Attempts are unbounded unless `max_attempts` is set. The delay after the
/// n-th failure is `base_delay * 2^(n-1)`, capped at `max_delay`, plus up to
/// 10% jitter so many devices coming back online do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Retry on every drain, forever.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Backoff after `attempts` failures, without jitter.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempts - 1);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// When an entry that has failed `attempts` times may be retried.
    #[must_use]
    pub fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_for(attempts);
        let jitter_ms = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };

        chrono::Duration::from_std(delay + jitter)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(now)
    }

    /// Whether an entry that has failed `attempts` times should be given up on.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
