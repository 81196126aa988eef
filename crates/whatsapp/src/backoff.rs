//! Reconnect delay policies.

use std::{fmt, sync::Arc, time::Duration};

use {
    rand::Rng,
    wagate_config::{ReconnectConfig, ReconnectStrategy},
};

/// Decides how long to wait before reconnect attempt `attempt` (1-based).
pub trait BackoffPolicy: Send + Sync + fmt::Debug {
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Consecutive attempts allowed before the session is marked failed.
    fn max_attempts(&self) -> Option<u32> {
        None
    }
}

/// Same delay for every attempt.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// `base * 2^(attempt-1)` capped at `max`, optionally with full jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
    pub max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    /// Delay before jitter is applied.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter {
            return ceiling;
        }
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// Build the policy described by `[whatsapp.reconnect]`.
pub fn from_config(config: &ReconnectConfig) -> Arc<dyn BackoffPolicy> {
    let base = Duration::from_secs(config.base_delay_secs);
    match config.strategy {
        ReconnectStrategy::Fixed => Arc::new(FixedBackoff {
            delay: base,
            max_attempts: config.max_attempts,
        }),
        ReconnectStrategy::Exponential => Arc::new(ExponentialBackoff {
            base,
            max: Duration::from_secs(config.max_delay_secs).max(base),
            jitter: config.jitter,
            max_attempts: config.max_attempts,
        }),
    }
}
