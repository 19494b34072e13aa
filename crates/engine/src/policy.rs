//! Retry policy: when to re-drive a transiently failed attempt, and whether to
//! give up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// base * attempt
    Linear,
    /// base * 2^(attempt - 1)
    Exponential,
}

/// Retry policy configuration.
///
/// The default re-drives every failed attempt one tick later, forever.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    /// Base delay; `None` uses the scheduler tick interval.
    pub base_delay: Option<Duration>,
    /// Cap for growing strategies; `None` means uncapped.
    pub max_delay: Option<Duration>,
    /// Attempts (including the first) after which a retryable failure is
    /// dead-lettered instead; `None` retries indefinitely.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry at a constant delay, forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Exponential backoff, capped at `max_delay`.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Some(base_delay),
            max_delay: Some(max_delay),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before re-driving an attempt that has been invoked `attempt`
    /// times (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32, tick_interval: Duration) -> Duration {
        let base = self.base_delay.unwrap_or(tick_interval);
        let attempt = attempt.max(1);

        let delay = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        };

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Whether an attempt invoked `attempt` times may be retried once more.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}
