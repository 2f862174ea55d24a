//! Retry timing after failed pushes.
//!
//! Backoff is independent of the debounce delay used for fresh local edits:
//! the two run on separate timers and cancel independently.

use std::time::Duration;

/// Computes `min(cap, base * 2^attempt)`.
///
/// Overflow saturates at `cap`.
pub fn next_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Maximum consecutive retries, or `None` to retry forever.
    pub max_retries: Option<u32>,
}

impl BackoffPolicy {
    /// Creates a policy with the given base and cap and unbounded retries.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            max_retries: None,
        }
    }

    /// Creates a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: Some(0),
            ..Self::default()
        }
    }

    /// Sets the base delay.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the maximum delay.
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Limits the number of consecutive retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        next_delay(attempt, self.base, self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Attempt counter driven by a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Creates a counter at attempt 0.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Returns the delay before the next retry and advances the counter.
    ///
    /// Returns `None` once the policy's retry limit is reached.
    pub fn next(&mut self) -> Option<Duration> {
        if self
            .policy
            .max_retries
            .is_some_and(|max| self.attempt >= max)
        {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Resets after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of retries handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}
