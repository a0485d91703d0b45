//! Retry policy types and the backoff scheduler.

use std::time::Duration;

use rand::Rng;

use super::error::ConfigError;

/// Exponents above this are clamped. `1ns * 2^96` already exceeds
/// `Duration::MAX`, so every non-zero base still saturates at `max_delay`.
const MAX_EXPONENT: u32 = 96;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A retry policy describing how a retry flow resubmits work.
///
/// Policies are pure data - they describe retry behavior but don't execute it.
/// The delay before the n-th resubmission is `base_delay * 2^n`, capped at
/// `max_delay`, then perturbed by `±randomization_factor` and clamped back
/// into `[0, max_delay]`.
///
/// # Examples
///
/// ```rust
/// use retryflow::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(Duration::from_millis(10))
///     .with_max_attempts(8)
///     .with_max_delay(Duration::from_secs(5));
///
/// assert!(policy.validate().is_ok());
/// assert_eq!(policy.delay_for(1), Duration::from_millis(20));
/// assert_eq!(policy.delay_for(20), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    randomization_factor: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    on_exhaustion: ExhaustionPolicy,
}

/// What a retry flow does when an element runs out of attempts while its
/// classifier still asks for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExhaustionPolicy {
    /// Emit the last response as a terminal outcome, flagged as exhausted.
    #[default]
    EmitLast,
    /// Abort the whole flow with [`RetryFlowError::Exhausted`](super::RetryFlowError::Exhausted).
    Fail,
}

/// Information about a scheduled retry or an exhaustion, passed to hooks.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a, Resp> {
    /// Attempt number of the submission that produced `response` (0 = first).
    pub attempt: u32,
    /// The response the classifier asked to retry.
    pub response: &'a Resp,
    /// Delay before the follow-up is resubmitted, `None` on exhaustion.
    pub next_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy with exponential backoff starting from `base`.
    ///
    /// Defaults: no retries, `max_delay == base`, no jitter. Chain the
    /// `with_*` methods to configure the rest.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use retryflow::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(Duration::from_millis(100))
    ///     .with_max_attempts(5)
    ///     .with_max_delay(Duration::from_secs(1));
    ///
    /// // 200ms, 400ms, 800ms, then capped
    /// assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    /// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    /// assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    /// assert_eq!(policy.delay_for(4), Duration::from_secs(1));
    /// ```
    pub fn exponential(base: Duration) -> Self {
        Self {
            max_attempts: 0,
            base_delay: base,
            max_delay: base,
            randomization_factor: 0.0,
            on_exhaustion: ExhaustionPolicy::EmitLast,
        }
    }

    /// Create a fully specified policy, validating it.
    ///
    /// ```rust
    /// use retryflow::{ConfigError, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let err = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(1), 0.0)
    ///     .unwrap_err();
    /// assert!(matches!(err, ConfigError::BaseExceedsMax { .. }));
    /// ```
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        randomization_factor: f64,
    ) -> Result<Self, ConfigError> {
        let policy = Self::exponential(base_delay)
            .with_max_attempts(max_attempts)
            .with_max_delay(max_delay)
            .with_jitter(randomization_factor);
        policy.validate()?;
        Ok(policy)
    }

    /// Set the maximum number of resubmissions per element.
    ///
    /// This does not include the initial submission: `with_max_attempts(3)`
    /// means up to 4 submissions. Zero turns the flow into a pass-through.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Set the randomization factor. Must lie in `[0, 1)`; checked by
    /// [`validate`](Self::validate), not here.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    /// Choose what happens on exhaustion.
    pub fn with_exhaustion(mut self, on_exhaustion: ExhaustionPolicy) -> Self {
        self.on_exhaustion = on_exhaustion;
        self
    }

    /// Get the maximum number of resubmissions.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the base delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Get the maximum delay cap.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Get the randomization factor.
    pub fn randomization_factor(&self) -> f64 {
        self.randomization_factor
    }

    /// Get the exhaustion policy.
    pub fn on_exhaustion(&self) -> ExhaustionPolicy {
        self.on_exhaustion
    }

    /// Calculate the un-jittered delay before resubmission `attempt`.
    ///
    /// `min(base * 2^attempt, max)`. Attempt 0 is the initial submission and
    /// the flow never delays it, but the function is total.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.min(MAX_EXPONENT);
        let nanos = self.base_delay.as_nanos().saturating_mul(1u128 << exp);
        if nanos >= self.max_delay.as_nanos() {
            return self.max_delay;
        }
        // Below max_delay, so the seconds fit in a u64.
        Duration::new(
            (nanos / NANOS_PER_SEC) as u64,
            (nanos % NANOS_PER_SEC) as u32,
        )
    }

    /// Calculate the jittered delay before resubmission `attempt` using a
    /// thread-local random source.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_for_with(attempt, &mut rand::rng())
    }

    /// Calculate the jittered delay using the supplied random source.
    ///
    /// Deterministic for a seeded `rng`.
    ///
    /// ```rust
    /// use rand::{rngs::StdRng, SeedableRng};
    /// use retryflow::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(Duration::from_millis(100))
    ///     .with_max_delay(Duration::from_secs(10))
    ///     .with_jitter(0.5);
    ///
    /// let a = policy.delay_for_with(3, &mut StdRng::seed_from_u64(7));
    /// let b = policy.delay_for_with(3, &mut StdRng::seed_from_u64(7));
    /// assert_eq!(a, b);
    /// assert!(a >= Duration::from_millis(400) && a <= Duration::from_millis(1200));
    /// ```
    pub fn delay_for_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.backoff(attempt);
        let factor = self.randomization_factor;
        if factor <= 0.0 || !factor.is_finite() || capped.is_zero() {
            return capped;
        }

        let multiplier = 1.0 + rng.random_range(-factor..=factor);
        let jittered = capped.as_secs_f64() * multiplier.max(0.0);
        Duration::try_from_secs_f64(jittered)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Check the policy for configuration faults.
    ///
    /// ```rust
    /// use retryflow::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let bad = RetryPolicy::exponential(Duration::from_millis(10)).with_jitter(1.0);
    /// assert!(bad.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay > self.max_delay {
            return Err(ConfigError::BaseExceedsMax {
                base: self.base_delay,
                max: self.max_delay,
            });
        }
        let factor = self.randomization_factor;
        if !(0.0..1.0).contains(&factor) {
            return Err(ConfigError::RandomizationOutOfRange(factor));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    /// 3 resubmissions, 100ms base, 10s cap, 20% jitter.
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100))
            .with_max_attempts(3)
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(0.2)
    }
}
