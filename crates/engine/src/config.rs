//! Retryable operator configuration.
//!
//! Fixed at construction; nothing here can change while a partition runs.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::policy::RetryPolicy;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_DEAD_LETTER_CHANNEL: &str = "dead-letters";

pub const ENV_TICK_INTERVAL_MS: &str = "REDRIVE_TICK_INTERVAL_MS";
pub const ENV_STORE_NAME: &str = "REDRIVE_STORE_NAME";
pub const ENV_DEAD_LETTER_CHANNEL: &str = "REDRIVE_DEAD_LETTER_CHANNEL";
pub const ENV_MAX_ATTEMPTS: &str = "REDRIVE_MAX_ATTEMPTS";
pub const ENV_DELIVERY: &str = "REDRIVE_DELIVERY";

/// Ordering of "remove from store" and "invoke" when re-driving an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Remove, then invoke. A crash in between loses the attempt.
    #[default]
    AtMostOnce,
    /// Invoke, then remove. A crash in between re-invokes the action.
    AtLeastOnce,
}

impl FromStr for DeliveryMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "at-most-once" => Ok(Self::AtMostOnce),
            "at-least-once" => Ok(Self::AtLeastOnce),
            other => Err(EngineError::config(format!("unknown delivery mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// How often due attempts are re-driven
    pub tick_interval: Duration,
    /// Retry store name; `None` derives it from the processor name
    pub store_name: Option<String>,
    /// Where fatally failed records are forwarded
    pub dead_letter_channel: String,
    pub policy: RetryPolicy,
    pub delivery: DeliveryMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            store_name: None,
            dead_letter_channel: DEFAULT_DEAD_LETTER_CHANNEL.to_string(),
            policy: RetryPolicy::default(),
            delivery: DeliveryMode::default(),
        }
    }
}

impl RetryConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    pub fn with_dead_letter_channel(mut self, channel: impl Into<String>) -> Self {
        self.dead_letter_channel = channel.into();
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Defaults overridden by any `REDRIVE_*` environment variables present.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TICK_INTERVAL_MS) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| EngineError::config(format!("{ENV_TICK_INTERVAL_MS}='{raw}': {e}")))?;
            config.tick_interval = Duration::from_millis(millis);
        }
        if let Some(name) = lookup(ENV_STORE_NAME) {
            config.store_name = Some(name);
        }
        if let Some(channel) = lookup(ENV_DEAD_LETTER_CHANNEL) {
            config.dead_letter_channel = channel;
        }
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            let max = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| EngineError::config(format!("{ENV_MAX_ATTEMPTS}='{raw}': {e}")))?;
            config.policy.max_attempts = Some(max);
        }
        if let Some(raw) = lookup(ENV_DELIVERY) {
            config.delivery = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.tick_interval.is_zero() {
            return Err(EngineError::config("tick interval must be greater than zero"));
        }
        if self.dead_letter_channel.trim().is_empty() {
            return Err(EngineError::config("dead-letter channel name must not be empty"));
        }
        if matches!(self.store_name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(EngineError::config("store name must not be empty"));
        }
        if self.policy.max_attempts == Some(0) {
            return Err(EngineError::config("max attempts must be at least 1"));
        }
        Ok(())
    }
}
