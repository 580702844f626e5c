//! Retry policy: classifies failed deliveries and suggests redelivery delays.

use std::time::Duration;

use super::{AttemptCount, FailureClass};

/// Retry policy for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts at or above this threshold are fatal.
    pub max_retry: u32,

    /// Base delay for the first redelivery.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRY: u32 = 5;

    pub fn new(max_retry: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retry,
            base_delay,
            multiplier,
        }
    }

    /// Classify a failed attempt.
    ///
    /// `attempt >= max_retry` is fatal, anything below is transient.
    pub fn classify(&self, attempt: AttemptCount) -> FailureClass {
        if attempt.get() >= self.max_retry {
            FailureClass::Fatal
        } else {
            FailureClass::Transient
        }
    }

    /// Delay hint before the transport redelivers.
    ///
    /// delay = base_delay * multiplier^(attempt - 1)
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempt: AttemptCount) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempt.get().saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        if delay_secs.is_finite() && delay_secs >= 0.0 {
            Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRY, Duration::from_secs(2), 2.0)
    }
}
