//! Testing utilities for code built on retry flows.
//!
//! [`MockStage`] is a scripted [`Stage`] that records every submission and
//! tracks how many submissions are in flight, so tests can assert on
//! resubmission counts, timing and the parallelism bound without a backend.
//!
//! # Example
//!
//! ```rust
//! use futures::stream;
//! use retryflow::testing::{collect_outcomes, MockStage};
//! use retryflow::{Decision, RetryFlowExt, RetryPolicy, WorkItem};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let stage = MockStage::new(|n: &u32| Ok(n * 2));
//! let probe = stage.clone();
//!
//! let flow = stream::iter(vec![WorkItem::new(1u32, ()), WorkItem::new(2, ())])
//!     .retry_flow(
//!         stage,
//!         |_: &u32, _: &()| Decision::<u32, ()>::Done,
//!         RetryPolicy::exponential(Duration::from_millis(1)),
//!         2,
//!     )
//!     .unwrap();
//!
//! let outcomes = collect_outcomes(flow).await.unwrap();
//! assert_eq!(outcomes.len(), 2);
//! assert_eq!(probe.submission_count(), 2);
//! # });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::time::Instant;

use crate::flow::{Outcome, Stage};
use crate::retry::RetryFlowError;

/// A fault injected by a [`MockStage`] responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFault(pub String);

impl std::fmt::Display for StageFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage fault: {}", self.0)
    }
}

impl std::error::Error for StageFault {}

type Responder<Req, Resp> = dyn Fn(&Req) -> Result<Resp, StageFault> + Send + Sync;
type Latency<Req> = dyn Fn(&Req) -> Duration + Send + Sync;

/// One recorded call to [`MockStage::submit`](Stage::submit).
#[derive(Debug, Clone)]
pub struct Submitted<Req> {
    /// The submitted request.
    pub request: Req,
    /// When it was submitted, on the tokio clock.
    pub at: Instant,
}

struct Probe<Req> {
    submissions: Mutex<Vec<Submitted<Req>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// A scripted [`Stage`] for tests.
///
/// Responses come from the responder closure, after an optional latency on
/// the tokio clock. Clones share the same recorded state.
pub struct MockStage<Req, Resp> {
    responder: Arc<Responder<Req, Resp>>,
    latency: Arc<Latency<Req>>,
    probe: Arc<Probe<Req>>,
}

impl<Req, Resp> Clone for MockStage<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            responder: Arc::clone(&self.responder),
            latency: Arc::clone(&self.latency),
            probe: Arc::clone(&self.probe),
        }
    }
}

impl<Req, Resp> std::fmt::Debug for MockStage<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStage")
            .field("in_flight", &self.in_flight())
            .field("peak_in_flight", &self.peak_in_flight())
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> MockStage<Req, Resp>
where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    /// Create a stage answering every request with `responder`, instantly.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Req) -> Result<Resp, StageFault> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            latency: Arc::new(|_| Duration::ZERO),
            probe: Arc::new(Probe {
                submissions: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.with_latency_fn(move |_| latency)
    }

    /// Delay each response by a per-request latency.
    pub fn with_latency_fn<F>(mut self, latency: F) -> Self
    where
        F: Fn(&Req) -> Duration + Send + Sync + 'static,
    {
        self.latency = Arc::new(latency);
        self
    }
}

impl<Req: Clone, Resp> MockStage<Req, Resp> {
    fn submissions_guard(&self) -> MutexGuard<'_, Vec<Submitted<Req>>> {
        // A panicking test thread must not hide the recorded calls.
        self.probe
            .submissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every submission so far, in submission order.
    pub fn submissions(&self) -> Vec<Submitted<Req>> {
        self.submissions_guard().clone()
    }

    /// Requests submitted so far, in submission order.
    pub fn requests(&self) -> Vec<Req> {
        self.submissions_guard()
            .iter()
            .map(|s| s.request.clone())
            .collect()
    }

    /// Number of submissions so far.
    pub fn submission_count(&self) -> usize {
        self.submissions_guard().len()
    }
}

impl<Req, Resp> MockStage<Req, Resp> {
    /// Submissions whose response has not been produced yet.
    pub fn in_flight(&self) -> usize {
        self.probe.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous in-flight submissions observed.
    pub fn peak_in_flight(&self) -> usize {
        self.probe.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count when a submission completes or is dropped.
struct InFlightGuard<Req> {
    probe: Arc<Probe<Req>>,
}

impl<Req> Drop for InFlightGuard<Req> {
    fn drop(&mut self) {
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<Req, Resp> Stage<Req> for MockStage<Req, Resp>
where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Error = StageFault;
    type Future = BoxFuture<'static, Result<Resp, StageFault>>;

    fn submit(&mut self, request: Req) -> Self::Future {
        self.submissions_guard().push(Submitted {
            request: request.clone(),
            at: Instant::now(),
        });
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let guard = InFlightGuard {
            probe: Arc::clone(&self.probe),
        };
        let responder = Arc::clone(&self.responder);
        let latency = (self.latency)(&request);

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let response = responder(&request);
            drop(guard);
            response
        })
    }
}

/// Drain a flow, stopping at the first error.
///
/// Outcomes yielded before the error are discarded along with it; use the
/// stream directly when they matter.
pub async fn collect_outcomes<St, Resp, Ctx, S, C>(
    flow: St,
) -> Result<Vec<Outcome<Resp, Ctx>>, RetryFlowError<S, C>>
where
    St: Stream<Item = Result<Outcome<Resp, Ctx>, RetryFlowError<S, C>>>,
{
    let mut flow = std::pin::pin!(flow);
    let mut outcomes = Vec::new();
    while let Some(item) = flow.next().await {
        outcomes.push(item?);
    }
    Ok(outcomes)
}
