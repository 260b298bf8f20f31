use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ErrorKind;

/// Source of jitter samples, each in `[0, 1)`
pub trait JitterSource: Send + Sync + Debug {
    fn sample(&self) -> f64;
}

/// Thread-local randomness, the production default
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Reproducible jitter from a fixed seed
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random::<f64>()
    }
}

/// Always zero
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self) -> f64 {
        0.0
    }
}

/// Outcome of consulting the policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn retry_after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }

    pub fn give_up() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Exponential backoff with a ceiling and additive jitter.
///
/// After failed attempt `n` (1-indexed) the policy waits
/// `min(base_delay * 2^(n-1), max_delay)` plus a jitter drawn from
/// `[0, that * jitter_fraction)`. Permanent errors never retry, and no
/// error retries once `n` exceeds `max_retries`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    jitter: Arc<dyn JitterSource>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_jitter(config, Arc::new(RandomJitter))
    }

    pub fn with_jitter(config: RetryConfig, jitter: Arc<dyn JitterSource>) -> Self {
        Self { config, jitter }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Decide what to do after attempt `attempt` failed with `kind`
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if kind == ErrorKind::Permanent || attempt > self.config.max_retries {
            return RetryDecision::give_up();
        }

        let delay = self.backoff(attempt);
        let jitter = delay.mul_f64(self.config.jitter_fraction * self.jitter.sample());
        RetryDecision::retry_after(delay + jitter)
    }

    /// Delay for `attempt` without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        2u32.checked_pow(exp)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .map_or(self.config.max_delay, |d| d.min(self.config.max_delay))
    }
}
