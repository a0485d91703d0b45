//! Elements travelling through a retry flow.

/// A request paired with caller-defined correlation context.
///
/// The flow never inspects `context`; it is threaded through unchanged and
/// handed back alongside the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<Req, Ctx> {
    /// The request submitted to the wrapped stage.
    pub request: Req,
    /// Opaque correlation context.
    pub context: Ctx,
}

impl<Req, Ctx> WorkItem<Req, Ctx> {
    /// Pair a request with its context.
    pub fn new(request: Req, context: Ctx) -> Self {
        Self { request, context }
    }

    /// Split into `(request, context)`.
    pub fn into_parts(self) -> (Req, Ctx) {
        (self.request, self.context)
    }
}

impl<Req, Ctx> From<(Req, Ctx)> for WorkItem<Req, Ctx> {
    fn from((request, context): (Req, Ctx)) -> Self {
        Self::new(request, context)
    }
}

/// A terminal result emitted downstream by a retry flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<Resp, Ctx> {
    /// The response of the last submission.
    pub response: Resp,
    /// The context of the work item that produced `response`.
    pub context: Ctx,
    /// Submissions made for this lineage, initial one included.
    pub attempts: u32,
    /// True if the classifier still wanted a retry but attempts ran out.
    pub exhausted: bool,
}

impl<Resp, Ctx> Outcome<Resp, Ctx> {
    /// Split into `(response, context)`, discarding metadata.
    pub fn into_parts(self) -> (Resp, Ctx) {
        (self.response, self.context)
    }

    /// Extract the response, discarding context and metadata.
    pub fn into_response(self) -> Resp {
        self.response
    }
}

/// An in-flight or scheduled submission owned by the coordinator.
#[derive(Debug)]
pub(crate) struct Attempt<Req, Ctx> {
    pub(crate) item: WorkItem<Req, Ctx>,
    /// 0 for the initial submission, +1 per resubmission.
    pub(crate) attempt: u32,
}

impl<Req, Ctx> Attempt<Req, Ctx> {
    pub(crate) fn fresh(item: WorkItem<Req, Ctx>) -> Self {
        Self { item, attempt: 0 }
    }

    pub(crate) fn follow_up(item: WorkItem<Req, Ctx>, attempt: u32) -> Self {
        Self { item, attempt }
    }
}
