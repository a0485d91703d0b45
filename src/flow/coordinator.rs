//! The retry coordinator: a stream driving submissions, classification and
//! delayed resubmission.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{join, ready, Join, Ready};
use futures::stream::{FusedStream, FuturesUnordered, Stream, StreamExt};
use rand::rngs::StdRng;
use tokio::time::Instant;

use super::classify::{Classifier, Decision};
use super::item::{Attempt, Outcome, WorkItem};
use super::schedule::RetryQueue;
use super::stage::Stage;
use crate::retry::{ExhaustionPolicy, RetryEvent, RetryFlowError, RetryPolicy};

pub(crate) type RetryHook<Resp> = Box<dyn Fn(&RetryEvent<'_, Resp>) + Send + Sync>;

/// Item type yielded by a [`RetryFlow`].
pub type FlowItem<S, C, Req, Ctx> = Result<
    Outcome<<S as Stage<Req>>::Response, Ctx>,
    RetryFlowError<
        <S as Stage<Req>>::Error,
        <C as Classifier<Req, <S as Stage<Req>>::Response, Ctx>>::Error,
    >,
>;

/// One submission in flight, joined with the tag needed to correlate it.
type Submission<F, Ctx> = Join<Pin<Box<F>>, Ready<(Ctx, u32)>>;

/// A stream of terminal [`Outcome`]s produced by resubmitting work through a
/// [`Stage`] until a [`Classifier`] is satisfied.
///
/// Created by [`RetryFlowBuilder::build`](super::RetryFlowBuilder::build) or
/// [`RetryFlowExt`](super::RetryFlowExt).
///
/// # Ordering
///
/// Outcomes are yielded in **completion order**, not in the order their work
/// items arrived from upstream. Correlate through [`Outcome::context`].
///
/// # Backpressure
///
/// Nothing happens unless the flow is polled. At most `parallelism`
/// submissions are in flight, and upstream is not pulled while `retry_capacity`
/// retries are pending, so a slow consumer pauses admission.
///
/// # Termination
///
/// The stream ends after upstream is exhausted and all work has settled, or
/// right after yielding a [`RetryFlowError`]. Dropping it, or calling
/// [`cancel`](RetryFlow::cancel), abandons in-flight submissions and
/// scheduled retries.
///
/// Backoff delays use the tokio timer, so the flow must be polled inside a
/// tokio runtime.
pub struct RetryFlow<St, S, C, Req, Ctx>
where
    S: Stage<Req>,
{
    upstream: Pin<Box<St>>,
    upstream_done: bool,
    stage: S,
    classifier: C,
    policy: RetryPolicy,
    parallelism: usize,
    retry_capacity: usize,
    in_flight: FuturesUnordered<Submission<S::Future, Ctx>>,
    retries: RetryQueue<Req, Ctx>,
    rng: StdRng,
    on_retry: Option<RetryHook<S::Response>>,
    terminated: bool,
}

// No field is structurally pinned: upstream and submissions are boxed.
impl<St, S, C, Req, Ctx> Unpin for RetryFlow<St, S, C, Req, Ctx> where S: Stage<Req> {}

impl<St, S, C, Req, Ctx> RetryFlow<St, S, C, Req, Ctx>
where
    St: Stream<Item = WorkItem<Req, Ctx>>,
    S: Stage<Req>,
    C: Classifier<Req, S::Response, Ctx>,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        upstream: St,
        stage: S,
        classifier: C,
        policy: RetryPolicy,
        parallelism: usize,
        retry_capacity: usize,
        rng: StdRng,
        on_retry: Option<RetryHook<S::Response>>,
    ) -> Self {
        Self {
            upstream: Box::pin(upstream),
            upstream_done: false,
            stage,
            classifier,
            policy,
            parallelism,
            retry_capacity,
            in_flight: FuturesUnordered::new(),
            retries: RetryQueue::new(),
            rng,
            on_retry,
            terminated: false,
        }
    }

    /// Submissions currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Retries waiting for their delay or for a free submission slot.
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// The policy this flow was built with.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Abandon all in-flight and scheduled work and end the stream.
    ///
    /// Nothing is resubmitted afterwards; the next poll yields `None`.
    pub fn cancel(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            in_flight = self.in_flight.len(),
            pending_retries = self.retries.len(),
            "retry flow cancelled"
        );
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.in_flight.clear();
        self.retries.clear();
        self.terminated = true;
    }

    fn abort(
        &mut self,
        error: RetryFlowError<S::Error, C::Error>,
    ) -> FlowItem<S, C, Req, Ctx> {
        #[cfg(feature = "tracing")]
        tracing::error!(
            in_flight = self.in_flight.len(),
            pending_retries = self.retries.len(),
            kind = match &error {
                RetryFlowError::Stage(_) => "stage",
                RetryFlowError::Classifier(_) => "classifier",
                RetryFlowError::Exhausted { .. } => "exhausted",
            },
            "retry flow aborted"
        );
        self.shutdown();
        Err(error)
    }

    fn submit(&mut self, attempt: Attempt<Req, Ctx>) {
        let (request, context) = attempt.item.into_parts();
        #[cfg(feature = "tracing")]
        tracing::trace!(
            attempt = attempt.attempt,
            in_flight = self.in_flight.len() + 1,
            "submitting"
        );
        let future = self.stage.submit(request);
        self.in_flight
            .push(join(Box::pin(future), ready((context, attempt.attempt))));
    }

    /// Fill free submission slots, due retries first.
    fn fill(&mut self, cx: &mut Context<'_>) {
        while self.in_flight.len() < self.parallelism {
            if let Some(attempt) = self.retries.pop_ready() {
                self.submit(attempt);
                continue;
            }
            if self.upstream_done || self.retries.len() >= self.retry_capacity {
                break;
            }
            match self.upstream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => self.submit(Attempt::fresh(item)),
                Poll::Ready(None) => self.upstream_done = true,
                Poll::Pending => break,
            }
        }
    }

    fn notify(&self, attempt: u32, response: &S::Response, next_delay: Option<Duration>) {
        if let Some(hook) = &self.on_retry {
            hook(&RetryEvent {
                attempt,
                response,
                next_delay,
            });
        }
    }

    /// Classify one completed submission. `None` means nothing to emit.
    fn complete(
        &mut self,
        result: Result<S::Response, S::Error>,
        context: Ctx,
        attempt: u32,
    ) -> Option<FlowItem<S, C, Req, Ctx>> {
        let response = match result {
            Ok(response) => response,
            Err(e) => return Some(self.abort(RetryFlowError::Stage(e))),
        };
        let follow_ups = match self.classifier.classify(&response, &context) {
            Ok(Decision::Done) => {
                return Some(Ok(Outcome {
                    response,
                    context,
                    attempts: attempt + 1,
                    exhausted: false,
                }))
            }
            Ok(Decision::RetryWith(follow_ups)) => follow_ups,
            Err(e) => return Some(self.abort(RetryFlowError::Classifier(e))),
        };

        if follow_ups.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::trace!(attempt, "branch dropped by classifier");
            return None;
        }

        // One exhausted outcome per response, however many follow-ups it asked for.
        if attempt >= self.policy.max_attempts() {
            self.notify(attempt, &response, None);
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts = attempt + 1, "retry attempts exhausted");
            return Some(match self.policy.on_exhaustion() {
                ExhaustionPolicy::EmitLast => Ok(Outcome {
                    response,
                    context,
                    attempts: attempt + 1,
                    exhausted: true,
                }),
                ExhaustionPolicy::Fail => self.abort(RetryFlowError::Exhausted {
                    attempts: attempt + 1,
                }),
            });
        }

        let next = attempt + 1;
        let now = Instant::now();
        for item in follow_ups {
            let delay = self.policy.delay_for_with(next, &mut self.rng);
            self.notify(attempt, &response, Some(delay));
            #[cfg(feature = "tracing")]
            tracing::debug!(attempt = next, ?delay, "retry scheduled");
            self.retries.schedule(Attempt::follow_up(item, next), delay, now);
        }
        None
    }
}

impl<St, S, C, Req, Ctx> Stream for RetryFlow<St, S, C, Req, Ctx>
where
    St: Stream<Item = WorkItem<Req, Ctx>>,
    S: Stage<Req>,
    C: Classifier<Req, S::Response, Ctx>,
{
    type Item = FlowItem<S, C, Req, Ctx>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        loop {
            this.retries.promote_due(Instant::now());
            this.fill(cx);

            if let Poll::Ready(Some((result, (context, attempt)))) =
                this.in_flight.poll_next_unpin(cx)
            {
                match this.complete(result, context, attempt) {
                    Some(item) => return Poll::Ready(Some(item)),
                    None => continue,
                }
            }

            if this.retries.poll_timer(cx).is_ready() {
                continue;
            }

            if this.upstream_done && this.in_flight.is_empty() && this.retries.is_empty() {
                this.terminated = true;
                return Poll::Ready(None);
            }
            return Poll::Pending;
        }
    }
}

impl<St, S, C, Req, Ctx> FusedStream for RetryFlow<St, S, C, Req, Ctx>
where
    St: Stream<Item = WorkItem<Req, Ctx>>,
    S: Stage<Req>,
    C: Classifier<Req, S::Response, Ctx>,
{
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<St, S, C, Req, Ctx> std::fmt::Debug for RetryFlow<St, S, C, Req, Ctx>
where
    S: Stage<Req>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryFlow")
            .field("policy", &self.policy)
            .field("parallelism", &self.parallelism)
            .field("retry_capacity", &self.retry_capacity)
            .field("in_flight", &self.in_flight.len())
            .field("retries", &self.retries)
            .field("upstream_done", &self.upstream_done)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
