//! The retry flow operator.
//!
//! A retry flow wraps an asynchronous request/response [`Stage`] and turns a
//! stream of [`WorkItem`]s into a stream of terminal [`Outcome`]s. Every
//! response is shown to a [`Classifier`], which either accepts it
//! ([`Decision::Done`]) or asks for follow-up requests
//! ([`Decision::RetryWith`]), for example a narrowed batch of only the keys
//! a backend left unprocessed. Follow-ups are resubmitted after an
//! exponential, jittered backoff, up to the policy's attempt budget.
//!
//! ```text
//! upstream ──> coordinator ──> stage ──> coordinator ──> classifier ──┬──> downstream
//!                   ^                                                  │
//!                   └──────────── delayed resubmission <───────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use futures::{stream, StreamExt};
//! use retryflow::{Decision, RetryFlowExt, RetryPolicy, WorkItem};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! // A backend that only processes up to two keys per request.
//! let stage = |keys: Vec<u32>| async move {
//!     let unprocessed = keys.iter().skip(2).copied().collect::<Vec<_>>();
//!     Ok::<_, String>((keys.len().min(2), unprocessed))
//! };
//!
//! // Retry with whatever was left unprocessed.
//! let classifier = |resp: &(usize, Vec<u32>), ctx: &&'static str| {
//!     if resp.1.is_empty() {
//!         Decision::Done
//!     } else {
//!         Decision::retry(resp.1.clone(), *ctx)
//!     }
//! };
//!
//! let policy = RetryPolicy::exponential(Duration::from_millis(1))
//!     .with_max_attempts(8)
//!     .with_max_delay(Duration::from_millis(50));
//!
//! let outcomes: Vec<_> = stream::iter(vec![WorkItem::new(vec![1, 2, 3, 4, 5], "batch")])
//!     .retry_flow(stage, classifier, policy, 1)
//!     .unwrap()
//!     .collect()
//!     .await;
//!
//! let outcome = outcomes.into_iter().next().unwrap().unwrap();
//! assert_eq!(outcome.context, "batch");
//! assert_eq!(outcome.attempts, 3);
//! # });
//! ```
//!
//! # Guarantees
//!
//! - **Unordered**: outcomes arrive in completion order. With `parallelism`
//!   1 and an order-preserving stage they happen to follow submission order;
//!   nothing else does.
//! - **Bounded**: never more than `parallelism` submissions in flight; upstream
//!   is paused while `retry_capacity` retries are pending.
//! - **No silent loss**: an element only disappears without output when its
//!   classifier returns an empty `RetryWith`. Exhaustion emits the last
//!   response with [`Outcome::exhausted`] set (or fails the flow under
//!   [`ExhaustionPolicy::Fail`](crate::ExhaustionPolicy::Fail)).
//! - **Fail-stop**: a stage or classifier error ends the flow, discarding all
//!   pending work.

mod builder;
mod classify;
mod coordinator;
mod ext;
mod item;
mod schedule;
mod stage;

pub use builder::RetryFlowBuilder;
pub use classify::{try_classifier, Classifier, Decision, TryClassifier};
pub use coordinator::{FlowItem, RetryFlow};
pub use ext::RetryFlowExt;
pub use item::{Outcome, WorkItem};
pub use stage::Stage;

#[cfg(test)]
mod tests;
