//! Retry policies for step execution
//!
//! A policy applies only to `FailureRetry` outcomes of the step it is
//! attached to. Attempts are numbered from 1; `delay_before_attempt(n)`
//! returns how long to sleep before attempt `n`, or `None` once the policy
//! is exhausted.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff strategy bounded by a maximum attempt count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// No retries; the first failure is final.
    None,
    /// Sleep a fixed interval between attempts.
    FixedInterval { interval_ms: u64, max_attempts: u32 },
    /// Sleep a random interval in `[0, operation_ms * max_concurrency)`,
    /// spreading contending retriers apart.
    RandomBackoff {
        operation_ms: u64,
        max_concurrency: u32,
        max_attempts: u32,
    },
    /// Double the delay each attempt, bounded by `cap_ms`.
    ExponentialBackoff {
        base_ms: u64,
        cap_ms: u64,
        max_attempts: u32,
    },
}

impl RetryPolicy {
    /// Delay to wait before attempt number `attempt` (1-based), or `None`
    /// when the policy allows no further attempts.
    pub fn delay_before_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            // The first attempt always runs immediately.
            return (attempt == 1).then_some(Duration::ZERO);
        }
        match *self {
            RetryPolicy::None => None,
            RetryPolicy::FixedInterval {
                interval_ms,
                max_attempts,
            } => (attempt <= max_attempts).then(|| Duration::from_millis(interval_ms)),
            RetryPolicy::RandomBackoff {
                operation_ms,
                max_concurrency,
                max_attempts,
            } => (attempt <= max_attempts).then(|| {
                let span = operation_ms.saturating_mul(u64::from(max_concurrency)).max(1);
                Duration::from_millis(rand::thread_rng().gen_range(0..span))
            }),
            RetryPolicy::ExponentialBackoff {
                base_ms,
                cap_ms,
                max_attempts,
            } => (attempt <= max_attempts).then(|| {
                let exp = attempt.saturating_sub(2).min(63);
                let delay = base_ms.saturating_mul(2u64.saturating_pow(exp));
                Duration::from_millis(delay.min(cap_ms))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_allows_single_attempt() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.delay_before_attempt(1), Some(Duration::ZERO));
        assert_eq!(policy.delay_before_attempt(2), None);
    }

    #[test]
    fn test_fixed_interval_bounds() {
        let policy = RetryPolicy::FixedInterval {
            interval_ms: 250,
            max_attempts: 3,
        };
        assert_eq!(policy.delay_before_attempt(1), Some(Duration::ZERO));
        assert_eq!(policy.delay_before_attempt(2), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_before_attempt(3), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_before_attempt(4), None);
    }

    #[test]
    fn test_random_backoff_within_span() {
        let policy = RetryPolicy::RandomBackoff {
            operation_ms: 10,
            max_concurrency: 4,
            max_attempts: 5,
        };
        for attempt in 2..=5 {
            let delay = policy.delay_before_attempt(attempt).unwrap();
            assert!(delay < Duration::from_millis(40));
        }
        assert_eq!(policy.delay_before_attempt(6), None);
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy::ExponentialBackoff {
            base_ms: 100,
            cap_ms: 350,
            max_attempts: 6,
        };
        assert_eq!(policy.delay_before_attempt(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_before_attempt(3), Some(Duration::from_millis(200)));
        // 400ms exceeds the cap
        assert_eq!(policy.delay_before_attempt(4), Some(Duration::from_millis(350)));
        assert_eq!(policy.delay_before_attempt(7), None);
    }
}
