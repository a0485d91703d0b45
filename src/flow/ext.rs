//! Extension trait attaching retry flows to any stream of work items.

use futures::Stream;

use super::builder::RetryFlowBuilder;
use super::classify::Classifier;
use super::coordinator::RetryFlow;
use super::item::WorkItem;
use super::stage::Stage;
use crate::retry::{ConfigError, RetryPolicy};

/// Extension trait for streams of [`WorkItem`]s.
///
/// Automatically implemented for every such stream.
///
/// # Example
///
/// ```rust
/// use futures::{stream, StreamExt};
/// use retryflow::{Decision, RetryFlowExt, RetryPolicy, WorkItem};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::exponential(Duration::from_millis(1))
///     .with_max_attempts(2)
///     .with_max_delay(Duration::from_millis(10));
///
/// let outcomes: Vec<_> = stream::iter((0..3u32).map(|n| WorkItem::new(n, n)))
///     .retry_flow(
///         |n: u32| async move { Ok::<_, String>(n * 10) },
///         |_resp: &u32, _ctx: &u32| Decision::<u32, u32>::Done,
///         policy,
///         2,
///     )
///     .unwrap()
///     .collect()
///     .await;
///
/// assert_eq!(outcomes.len(), 3);
/// # });
/// ```
pub trait RetryFlowExt<Req, Ctx>: Stream<Item = WorkItem<Req, Ctx>> + Sized {
    /// Wrap `stage` with `policy`-driven retries, at most `parallelism`
    /// submissions in flight.
    fn retry_flow<S, C>(
        self,
        stage: S,
        classifier: C,
        policy: RetryPolicy,
        parallelism: usize,
    ) -> Result<RetryFlow<Self, S, C, Req, Ctx>, ConfigError>
    where
        S: Stage<Req>,
        C: Classifier<Req, S::Response, Ctx>,
    {
        RetryFlowBuilder::new(stage, classifier)
            .policy(policy)
            .parallelism(parallelism)
            .build(self)
    }

    /// Attach a fully configured builder.
    fn retry_with<S, C>(
        self,
        builder: RetryFlowBuilder<S, C, S::Response>,
    ) -> Result<RetryFlow<Self, S, C, Req, Ctx>, ConfigError>
    where
        S: Stage<Req>,
        C: Classifier<Req, S::Response, Ctx>,
    {
        builder.build(self)
    }
}

impl<St, Req, Ctx> RetryFlowExt<Req, Ctx> for St where St: Stream<Item = WorkItem<Req, Ctx>> {}
