//! Retry policy and backoff scheduling.
//!
//! - **Pure Core**: [`RetryPolicy`] is just data with no side effects; the
//!   backoff scheduler is a function of the attempt number and a random source
//! - **Validated**: configuration faults are caught by [`RetryPolicy::validate`]
//!   before any stream activity
//!
//! # Backoff
//!
//! The delay before resubmission `n` is `min(base * 2^n, max)`, multiplied by
//! `1 + uniform(-r, r)` and clamped back into `[0, max]`. The first
//! submission of an element is never delayed, so the first retry waits
//! `base * 2`.
//!
//! ```rust
//! use retryflow::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential(Duration::from_millis(10))
//!     .with_max_attempts(8)
//!     .with_max_delay(Duration::from_secs(5));
//!
//! let delays: Vec<_> = (1..=4).map(|n| policy.delay_for(n)).collect();
//! assert_eq!(
//!     delays,
//!     [20, 40, 80, 160].map(Duration::from_millis).to_vec()
//! );
//! ```
//!
//! # Error Types
//!
//! - [`ConfigError`]: an invalid policy or flow option
//! - [`RetryFlowError`]: a fatal fault that terminated a running flow

mod error;
mod policy;

pub use error::{ConfigError, RetryFlowError};
pub use policy::{ExhaustionPolicy, RetryEvent, RetryPolicy};
