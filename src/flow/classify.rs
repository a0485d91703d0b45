//! The classifier contract: decide whether a response is final.

use std::convert::Infallible;
use std::marker::PhantomData;

use super::item::WorkItem;

/// The verdict of a [`Classifier`] on one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<Req, Ctx> {
    /// The response is final and is emitted downstream.
    Done,
    /// Resubmit these follow-ups after a backoff delay.
    ///
    /// An empty list drops the branch: nothing is emitted and no further
    /// work is scheduled.
    RetryWith(Vec<WorkItem<Req, Ctx>>),
}

impl<Req, Ctx> Decision<Req, Ctx> {
    /// The response is final.
    pub fn done() -> Self {
        Self::Done
    }

    /// Retry with a single follow-up.
    pub fn retry(request: Req, context: Ctx) -> Self {
        Self::RetryWith(vec![WorkItem::new(request, context)])
    }

    /// Retry with any number of follow-ups.
    pub fn retry_with<I>(items: I) -> Self
    where
        I: IntoIterator<Item = WorkItem<Req, Ctx>>,
    {
        Self::RetryWith(items.into_iter().collect())
    }

    /// Drop the branch without emitting.
    pub fn drop_branch() -> Self {
        Self::RetryWith(Vec::new())
    }

    /// Returns true for [`Decision::Done`].
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Decides, per response, whether work is complete or must be resubmitted.
///
/// Implemented for every `Fn(&Resp, &Ctx) -> Decision<Req, Ctx>` closure.
/// Use [`try_classifier`] for a classifier that can fail; its error aborts
/// the flow.
///
/// # Example
///
/// ```rust
/// use retryflow::{Classifier, Decision};
///
/// // Retry a "partial" response with the unprocessed remainder.
/// let classifier = |resp: &Vec<u32>, job: &u64| {
///     if resp.is_empty() {
///         Decision::Done
///     } else {
///         Decision::retry(resp.clone(), *job)
///     }
/// };
///
/// assert!(classifier.classify(&vec![], &7).unwrap().is_done());
/// ```
pub trait Classifier<Req, Resp, Ctx> {
    /// Error returned when the classifier cannot classify a response.
    type Error;

    /// Classify `response`, produced for the work item carrying `context`.
    fn classify(&self, response: &Resp, context: &Ctx) -> Result<Decision<Req, Ctx>, Self::Error>;
}

impl<Req, Resp, Ctx, F> Classifier<Req, Resp, Ctx> for F
where
    F: Fn(&Resp, &Ctx) -> Decision<Req, Ctx>,
{
    type Error = Infallible;

    fn classify(&self, response: &Resp, context: &Ctx) -> Result<Decision<Req, Ctx>, Infallible> {
        Ok(self(response, context))
    }
}

/// A classifier built from a fallible closure.
///
/// Created by [`try_classifier`].
pub struct TryClassifier<F, E> {
    f: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> std::fmt::Debug for TryClassifier<F, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TryClassifier").finish_non_exhaustive()
    }
}

/// Wrap a fallible closure as a [`Classifier`].
///
/// ```rust
/// use retryflow::{try_classifier, Classifier, Decision};
///
/// let classifier = try_classifier(|status: &u16, _ctx: &()| match status {
///     200 => Ok(Decision::<(), ()>::Done),
///     503 => Ok(Decision::retry((), ())),
///     other => Err(format!("unexpected status {}", other)),
/// });
///
/// assert!(classifier.classify(&200, &()).unwrap().is_done());
/// assert!(classifier.classify(&418, &()).is_err());
/// ```
pub fn try_classifier<Req, Resp, Ctx, E, F>(f: F) -> TryClassifier<F, E>
where
    F: Fn(&Resp, &Ctx) -> Result<Decision<Req, Ctx>, E>,
{
    TryClassifier {
        f,
        _error: PhantomData,
    }
}

impl<Req, Resp, Ctx, E, F> Classifier<Req, Resp, Ctx> for TryClassifier<F, E>
where
    F: Fn(&Resp, &Ctx) -> Result<Decision<Req, Ctx>, E>,
{
    type Error = E;

    fn classify(&self, response: &Resp, context: &Ctx) -> Result<Decision<Req, Ctx>, E> {
        (self.f)(response, context)
    }
}
