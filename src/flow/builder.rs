//! Configuration of a retry flow.

use std::marker::PhantomData;

use futures::Stream;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::classify::Classifier;
use super::coordinator::{RetryFlow, RetryHook};
use super::item::WorkItem;
use super::stage::Stage;
use crate::retry::{ConfigError, RetryEvent, RetryPolicy};

/// Builder for a [`RetryFlow`].
///
/// Collects the stage, the classifier and the flow options; [`build`](Self::build)
/// validates everything and attaches an upstream.
///
/// | Option | Default |
/// |--------|---------|
/// | `policy` | [`RetryPolicy::default()`] |
/// | `parallelism` | 1 |
/// | `retry_capacity` | `parallelism` |
/// | `seed` | from the OS |
///
/// # Example
///
/// ```rust
/// use futures::{stream, StreamExt};
/// use retryflow::{Decision, RetryFlowBuilder, RetryPolicy, WorkItem};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let flow = RetryFlowBuilder::new(
///     |n: u32| async move { Ok::<_, String>(n + 1) },
///     |_resp: &u32, _ctx: &char| Decision::<u32, char>::Done,
/// )
/// .policy(RetryPolicy::exponential(Duration::from_millis(10)).with_max_attempts(3))
/// .parallelism(4)
/// .build(stream::iter(vec![WorkItem::new(1, 'a'), WorkItem::new(2, 'b')]))
/// .unwrap();
///
/// let outcomes: Vec<_> = flow.collect().await;
/// assert_eq!(outcomes.len(), 2);
/// # });
/// ```
pub struct RetryFlowBuilder<S, C, Resp> {
    stage: S,
    classifier: C,
    policy: RetryPolicy,
    parallelism: usize,
    retry_capacity: Option<usize>,
    seed: Option<u64>,
    on_retry: Option<RetryHook<Resp>>,
    _response: PhantomData<fn(&Resp)>,
}

impl<S, C, Resp> RetryFlowBuilder<S, C, Resp> {
    /// Start a builder wrapping `stage`, judged by `classifier`.
    pub fn new(stage: S, classifier: C) -> Self {
        Self {
            stage,
            classifier,
            policy: RetryPolicy::default(),
            parallelism: 1,
            retry_capacity: None,
            seed: None,
            on_retry: None,
            _response: PhantomData,
        }
    }

    /// Set the retry policy.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Maximum number of submissions, fresh or retried, in flight at once.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Maximum number of pending retries before upstream stops being pulled.
    pub fn retry_capacity(mut self, capacity: usize) -> Self {
        self.retry_capacity = Some(capacity);
        self
    }

    /// Seed the jitter source, making delays reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Observe every scheduled retry and every exhaustion.
    ///
    /// The hook runs synchronously inside the flow's poll; keep it cheap.
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryEvent<'_, Resp>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Validate the configuration and attach `upstream`.
    pub fn build<St, Req, Ctx>(
        self,
        upstream: St,
    ) -> Result<RetryFlow<St, S, C, Req, Ctx>, ConfigError>
    where
        St: Stream<Item = WorkItem<Req, Ctx>>,
        S: Stage<Req, Response = Resp>,
        C: Classifier<Req, Resp, Ctx>,
    {
        self.policy.validate()?;
        if self.parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        let retry_capacity = self.retry_capacity.unwrap_or(self.parallelism);
        if retry_capacity == 0 {
            return Err(ConfigError::ZeroRetryCapacity);
        }

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            max_attempts = self.policy.max_attempts(),
            parallelism = self.parallelism,
            retry_capacity,
            "retry flow built"
        );

        Ok(RetryFlow::new(
            upstream,
            self.stage,
            self.classifier,
            self.policy,
            self.parallelism,
            retry_capacity,
            rng,
            self.on_retry,
        ))
    }
}

impl<S, C, Resp> std::fmt::Debug for RetryFlowBuilder<S, C, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryFlowBuilder")
            .field("policy", &self.policy)
            .field("parallelism", &self.parallelism)
            .field("retry_capacity", &self.retry_capacity)
            .field("seed", &self.seed)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::classify::Decision;
    use futures::stream;
    use std::time::Duration;

    type Builder = RetryFlowBuilder<
        fn(u32) -> std::future::Ready<Result<u32, ()>>,
        fn(&u32, &()) -> Decision<u32, ()>,
        u32,
    >;

    fn builder() -> Builder {
        RetryFlowBuilder::new(
            (|n| std::future::ready(Ok(n))) as fn(u32) -> std::future::Ready<Result<u32, ()>>,
            (|_: &u32, _: &()| Decision::Done) as fn(&u32, &()) -> Decision<u32, ()>,
        )
    }

    fn empty() -> stream::Empty<WorkItem<u32, ()>> {
        stream::empty()
    }

    #[test]
    fn rejects_zero_parallelism() {
        let err = builder().parallelism(0).build(empty()).unwrap_err();
        assert_eq!(err, ConfigError::ZeroParallelism);
    }

    #[test]
    fn rejects_zero_retry_capacity() {
        let err = builder().retry_capacity(0).build(empty()).unwrap_err();
        assert_eq!(err, ConfigError::ZeroRetryCapacity);
    }

    #[test]
    fn rejects_invalid_policy_before_streaming() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1))
            .with_max_delay(Duration::from_millis(1));
        let err = builder().policy(policy).build(empty()).unwrap_err();
        assert!(matches!(err, ConfigError::BaseExceedsMax { .. }));
    }

    #[test]
    fn retry_capacity_defaults_to_parallelism() {
        let flow = builder().parallelism(7).build(empty()).unwrap();
        let debug = format!("{:?}", flow);
        assert!(debug.contains("retry_capacity: 7"));
    }
}
