//! Error types for retry flows.

use std::time::Duration;

/// A retry policy or flow option that was rejected at construction time.
///
/// # Examples
///
/// ```rust
/// use retryflow::{ConfigError, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(Duration::from_secs(1))
///     .with_max_delay(Duration::from_millis(10));
///
/// match policy.validate() {
///     Err(ConfigError::BaseExceedsMax { base, max }) => {
///         assert_eq!(base, Duration::from_secs(1));
///         assert_eq!(max, Duration::from_millis(10));
///     }
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `base_delay` is larger than `max_delay`.
    BaseExceedsMax {
        /// The configured base delay.
        base: Duration,
        /// The configured maximum delay.
        max: Duration,
    },
    /// The randomization factor is outside `[0, 1)`.
    RandomizationOutOfRange(f64),
    /// `parallelism` was zero.
    ZeroParallelism,
    /// The retry capacity was zero.
    ZeroRetryCapacity,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BaseExceedsMax { base, max } => {
                write!(f, "base delay {:?} exceeds max delay {:?}", base, max)
            }
            Self::RandomizationOutOfRange(factor) => {
                write!(f, "randomization factor {} is outside [0, 1)", factor)
            }
            Self::ZeroParallelism => write!(f, "parallelism must be at least 1"),
            Self::ZeroRetryCapacity => write!(f, "retry capacity must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A fatal fault that terminated a retry flow.
///
/// A flow yields at most one of these, as its last item. All in-flight and
/// scheduled work has been discarded by the time it is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFlowError<S, C> {
    /// The wrapped stage failed to execute a submission.
    Stage(S),
    /// The classifier could not classify a response.
    Classifier(C),
    /// An element ran out of attempts under [`ExhaustionPolicy::Fail`](super::ExhaustionPolicy::Fail).
    Exhausted {
        /// Total submissions made for the element (initial + retries).
        attempts: u32,
    },
}

impl<S, C> RetryFlowError<S, C> {
    /// Returns true if the stage faulted.
    pub fn is_stage(&self) -> bool {
        matches!(self, Self::Stage(_))
    }

    /// Returns true if the classifier faulted.
    pub fn is_classifier(&self) -> bool {
        matches!(self, Self::Classifier(_))
    }

    /// Returns true if an element ran out of attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Get the stage error if present.
    pub fn into_stage(self) -> Option<S> {
        match self {
            Self::Stage(e) => Some(e),
            _ => None,
        }
    }
}

impl<S: std::fmt::Display, C: std::fmt::Display> std::fmt::Display for RetryFlowError<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(e) => write!(f, "stage failed: {}", e),
            Self::Classifier(e) => write!(f, "classifier failed: {}", e),
            Self::Exhausted { attempts } => {
                write!(f, "retry exhausted after {} attempts", attempts)
            }
        }
    }
}

impl<S, C> std::error::Error for RetryFlowError<S, C>
where
    S: std::error::Error + 'static,
    C: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stage(e) => Some(e),
            Self::Classifier(e) => Some(e),
            Self::Exhausted { .. } => None,
        }
    }
}
