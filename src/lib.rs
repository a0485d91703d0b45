//! # Retryflow
//!
//! A stream operator that wraps an asynchronous request/response stage and
//! resubmits work, after an exponential backoff, for as long as a classifier
//! says the response is not final.
//!
//! The canonical use is a batch API that may leave part of a request
//! unprocessed: the classifier inspects each response and returns a narrowed
//! follow-up request containing only the leftover keys.
//!
//! ## Philosophy
//!
//! - **Policy is data**: [`RetryPolicy`] only describes delays and budgets.
//! - **Classification is pure**: a [`Classifier`] looks at a response and its
//!   context and returns a [`Decision`]; the flow does the scheduling.
//! - **The stage is opaque**: anything implementing [`Stage`], including a
//!   plain async closure, can be wrapped.
//!
//! ## Quick Example
//!
//! ```rust
//! use futures::{stream, StreamExt};
//! use retryflow::{Decision, RetryFlowExt, RetryPolicy, WorkItem};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct BatchGetResponse {
//!     items: Vec<String>,
//!     unprocessed: Vec<String>,
//! }
//!
//! # tokio_test::block_on(async {
//! // Processes at most one key per call, like a throttled backend.
//! let stage = |keys: Vec<String>| async move {
//!     let mut keys = keys.into_iter();
//!     Ok::<_, String>(BatchGetResponse {
//!         items: keys.next().into_iter().collect(),
//!         unprocessed: keys.collect(),
//!     })
//! };
//!
//! let classifier = |resp: &BatchGetResponse, table: &u8| {
//!     if resp.unprocessed.is_empty() {
//!         Decision::Done
//!     } else {
//!         Decision::retry(resp.unprocessed.clone(), *table)
//!     }
//! };
//!
//! let policy = RetryPolicy::exponential(Duration::from_millis(1))
//!     .with_max_attempts(8)
//!     .with_max_delay(Duration::from_millis(20));
//!
//! let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
//! let outcomes: Vec<_> = stream::iter(vec![WorkItem::new(keys, 7u8)])
//!     .retry_flow(stage, classifier, policy, 4)
//!     .unwrap()
//!     .collect()
//!     .await;
//!
//! let last = outcomes[0].as_ref().unwrap();
//! assert_eq!(last.attempts, 3);
//! assert_eq!(last.response.items, vec!["c".to_string()]);
//! assert!(!last.exhausted);
//! # });
//! ```
//!
//! ## Features
//!
//! - `tracing` (default): emit `tracing` events for scheduling, exhaustion
//!   and aborts.
//! - `serde`: `Serialize`/`Deserialize` for [`RetryPolicy`] and
//!   [`ExhaustionPolicy`], for loading policies from configuration files.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod flow;
pub mod retry;
pub mod testing;

// Re-exports
pub use flow::{
    try_classifier, Classifier, Decision, FlowItem, Outcome, RetryFlow, RetryFlowBuilder,
    RetryFlowExt, Stage, TryClassifier, WorkItem,
};
pub use retry::{ConfigError, ExhaustionPolicy, RetryEvent, RetryFlowError, RetryPolicy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::flow::{
        try_classifier, Classifier, Decision, Outcome, RetryFlowBuilder, RetryFlowExt, Stage,
        WorkItem,
    };
    pub use crate::retry::{ExhaustionPolicy, RetryFlowError, RetryPolicy};
}
