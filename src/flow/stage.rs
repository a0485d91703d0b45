//! The wrapped request/response capability.

use std::future::Future;

/// An asynchronous "submit one request, get one completion" capability.
///
/// The retry flow calls [`submit`](Stage::submit) at most `parallelism` times
/// without the returned futures having completed, and polls those futures
/// concurrently. How the stage produces a response (network call, batching,
/// an in-memory mock) is its own business.
///
/// `Ok` responses go to the classifier, including responses that describe a
/// failed request. `Err` means the stage itself cannot execute the request
/// and aborts the whole flow.
///
/// Implemented for every `FnMut(Req) -> impl Future<Output = Result<_, _>>`.
///
/// # Example
///
/// ```rust
/// use retryflow::Stage;
///
/// # tokio_test::block_on(async {
/// let mut stage = |n: u32| async move { Ok::<_, String>(n * 2) };
/// assert_eq!(stage.submit(21).await, Ok(42));
/// # });
/// ```
pub trait Stage<Req> {
    /// The response produced for a request.
    type Response;
    /// A fault of the stage itself.
    type Error;
    /// The pending completion of one submission.
    type Future: Future<Output = Result<Self::Response, Self::Error>>;

    /// Submit one request.
    fn submit(&mut self, request: Req) -> Self::Future;
}

impl<Req, Resp, E, F, Fut> Stage<Req> for F
where
    F: FnMut(Req) -> Fut,
    Fut: Future<Output = Result<Resp, E>>,
{
    type Response = Resp;
    type Error = E;
    type Future = Fut;

    fn submit(&mut self, request: Req) -> Fut {
        self(request)
    }
}
