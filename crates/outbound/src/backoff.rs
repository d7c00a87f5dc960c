//! Retry policy and exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Base delay of the exponential schedule, in seconds.
pub const BASE_DELAY_SECS: u64 = 30;

/// Default ceiling applied before jitter, in seconds.
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 3600;

/// Default number of attempts before a job fails terminally.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default symmetric jitter fraction.
pub const DEFAULT_JITTER: f64 = 0.2;

/// Retry policy for outbound jobs.
///
/// Delay for `attempts` completed attempts is `base * 2^attempts`, capped at
/// `max_delay`, then jittered by `±jitter` of the capped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before the job is terminal.
    pub max_attempts: u32,
    /// Base delay of the exponential schedule.
    pub base_delay: Duration,
    /// Maximum delay cap (applied before jitter).
    pub max_delay: Duration,
    /// Jitter fraction (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(BASE_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_BACKOFF_CAP_SECS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            max_delay,
            ..Default::default()
        }
    }

    /// Exponential delay before jitter.
    pub fn capped_delay(&self, attempts: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let cap = self.max_delay.as_secs_f64();
        // 2^64 already exceeds any sane cap; clamping the exponent keeps powi finite.
        let exp = 2_f64.powi(attempts.min(64) as i32);
        Duration::from_secs_f64((base * exp).min(cap))
    }

    /// Delay for `attempts` with an explicit jitter sample in `[-1, 1]`.
    pub fn delay_with_sample(&self, attempts: u32, sample: f64) -> Duration {
        let capped = self.capped_delay(attempts).as_secs_f64();
        let sample = if sample.is_finite() { sample.clamp(-1.0, 1.0) } else { 0.0 };
        let jitter = capped * self.jitter.clamp(0.0, 1.0) * sample;
        let secs = (capped + jitter).floor().max(0.0);
        Duration::from_secs(secs as u64)
    }

    /// Delay for `attempts` with a random jitter sample.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_sample(attempts, sample)
    }

    /// Upper bound any delay can reach.
    pub fn max_jittered_delay(&self) -> Duration {
        self.delay_with_sample(u32::MAX, 1.0)
    }

    /// `true` once `attempts` has used up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Backoff in whole seconds for `attempts`, capped at `cap_secs` before jitter.
pub fn backoff_seconds(attempts: u32, cap_secs: u64) -> u64 {
    RetryPolicy::new(DEFAULT_MAX_ATTEMPTS, Duration::from_secs(cap_secs))
        .delay_for_attempt(attempts)
        .as_secs()
}
