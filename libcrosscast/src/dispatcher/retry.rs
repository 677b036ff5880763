//! Retry ceiling and exponential backoff

use std::time::Duration;

/// What to do after a transient publish failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue with the bumped counter after `delay`
    Retry { retry_count: u32, delay: Duration },
    /// Ceiling reached; the publication fails
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit; the n-th retry waits `2^n` units
    pub base: Duration,
    /// Upper bound on a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max_delay: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RetryPolicy {
    /// `2^retry_count` base units, capped.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide the next step for a publication that has already been
    /// retried `retry_count` times.
    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        if retry_count < max_retries {
            let next = retry_count + 1;
            RetryDecision::Retry {
                retry_count: next,
                delay: self.delay_for(next),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}
