//! Backoff strategies for retried jobs.
//!
//! A job that returns a retry outcome is re-shelved with a new backoff
//! interval computed from its strategy and attempt count. The default for
//! every job type is exponential with jitter; job types wrapping slow external
//! processes typically override this with a long fixed interval.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of jitter that can be applied to backoff delays.
///
/// Jitter prevents many jobs that failed together from all becoming eligible
/// again at exactly the same instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JitterType {
    /// Add or subtract a random duration between 0 and the specified value.
    Additive(Duration),

    /// Multiply the delay by a random factor in `1.0 ± factor`.
    Multiplicative(f64),
}

impl JitterType {
    /// Apply jitter to a delay. The result is never negative.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();

        match self {
            JitterType::Additive(jitter_amount) => {
                let jitter_millis = rng.gen_range(0..=jitter_amount.as_millis() as u64);
                let jitter = Duration::from_millis(jitter_millis);

                if rng.gen_bool(0.5) {
                    delay + jitter
                } else {
                    delay.saturating_sub(jitter)
                }
            }
            JitterType::Multiplicative(factor) => {
                let jitter_factor = rng.gen_range((1.0 - factor)..=(1.0 + factor));
                let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
                Duration::from_millis(jittered_millis)
            }
        }
    }
}

/// Strategy for computing the delay before a retried job becomes eligible again.
///
/// # Examples
///
/// ```rust
/// use jobsmith::backoff::BackoffStrategy;
/// use std::time::Duration;
///
/// // Fixed delay: every retry waits the same amount
/// let fixed = BackoffStrategy::Fixed(Duration::from_secs(30));
/// assert_eq!(fixed.delay_for_attempt(1), Duration::from_secs(30));
/// assert_eq!(fixed.delay_for_attempt(5), Duration::from_secs(30));
///
/// // Exponential: 1s, 2s, 4s, 8s... capped at the max
/// let exponential = BackoffStrategy::Exponential {
///     base: Duration::from_secs(1),
///     multiplier: 2.0,
///     max_delay: Some(Duration::from_secs(60)),
///     jitter: None,
/// };
/// assert_eq!(exponential.delay_for_attempt(1), Duration::from_secs(1));
/// assert_eq!(exponential.delay_for_attempt(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BackoffStrategy {
    /// Constant delay between all retry attempts.
    Fixed(Duration),

    /// Linearly increasing delay with an optional cap.
    Linear {
        base: Duration,
        increment: Duration,
        max_delay: Option<Duration>,
    },

    /// Exponentially increasing delay with an optional cap and jitter.
    Exponential {
        base: Duration,
        multiplier: f64,
        max_delay: Option<Duration>,
        jitter: Option<JitterType>,
    },
}

impl BackoffStrategy {
    /// The crate-wide default: exponential from 1s, doubling, capped at 1h,
    /// with ±10% jitter.
    pub fn default_exponential() -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Some(Duration::from_secs(60 * 60)),
            jitter: Some(JitterType::Multiplicative(0.1)),
        }
    }

    /// Compute the delay before the given attempt number (1-based) becomes
    /// eligible.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);

        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Linear {
                base,
                increment,
                max_delay,
            } => {
                let delay = base.saturating_add(increment.saturating_mul(attempt - 1));
                Self::clamp(delay, *max_delay)
            }
            BackoffStrategy::Exponential {
                base,
                multiplier,
                max_delay,
                jitter,
            } => {
                let factor = multiplier.powi((attempt - 1) as i32);
                let millis = (base.as_millis() as f64 * factor).min(u64::MAX as f64) as u64;
                let delay = Self::clamp(Duration::from_millis(millis), *max_delay);

                match jitter {
                    Some(jitter) => Self::clamp(jitter.apply(delay), *max_delay),
                    None => delay,
                }
            }
        }
    }

    fn clamp(delay: Duration, max_delay: Option<Duration>) -> Duration {
        match max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::default_exponential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let strategy = BackoffStrategy::Fixed(Duration::from_secs(45));

        assert_eq!(strategy.delay_for_attempt(1), Duration::from_secs(45));
        assert_eq!(strategy.delay_for_attempt(100), Duration::from_secs(45));
    }

    #[test]
    fn test_linear_delay() {
        let strategy = BackoffStrategy::Linear {
            base: Duration::from_secs(10),
            increment: Duration::from_secs(10),
            max_delay: Some(Duration::from_secs(35)),
        };

        assert_eq!(strategy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_secs(30));
        // capped
        assert_eq!(strategy.delay_for_attempt(4), Duration::from_secs(35));
    }

    #[test]
    fn test_exponential_delay() {
        let strategy = BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Some(Duration::from_secs(10)),
            jitter: None,
        };

        assert_eq!(strategy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(strategy.delay_for_attempt(4), Duration::from_secs(8));
        // capped
        assert_eq!(strategy.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let strategy = BackoffStrategy::Exponential {
            base: Duration::from_secs(2),
            multiplier: 3.0,
            max_delay: None,
            jitter: None,
        };

        assert_eq!(strategy.delay_for_attempt(0), strategy.delay_for_attempt(1));
    }

    #[test]
    fn test_additive_jitter_bounds() {
        let jitter = JitterType::Additive(Duration::from_secs(5));
        let base_delay = Duration::from_secs(30);

        for _ in 0..100 {
            let jittered = jitter.apply(base_delay);
            assert!(jittered >= Duration::from_secs(25));
            assert!(jittered <= Duration::from_secs(35));
        }
    }

    #[test]
    fn test_multiplicative_jitter_bounds() {
        let jitter = JitterType::Multiplicative(0.2);
        let base_delay = Duration::from_secs(10);

        for _ in 0..100 {
            let jittered = jitter.apply(base_delay);
            assert!(jittered >= Duration::from_secs(8));
            assert!(jittered <= Duration::from_secs(12));
        }
    }

    #[test]
    fn test_default_is_jittered_exponential() {
        let strategy = BackoffStrategy::default();

        match strategy {
            BackoffStrategy::Exponential {
                max_delay, jitter, ..
            } => {
                assert!(max_delay.is_some());
                assert!(jitter.is_some());
            }
            other => panic!("unexpected default strategy: {:?}", other),
        }
    }
}
