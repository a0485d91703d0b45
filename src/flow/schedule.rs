//! Time-ordered holding area for retries waiting out their backoff.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep};

use super::item::Attempt;

/// An attempt waiting for its ready-at instant.
#[derive(Debug)]
pub(crate) struct ScheduledRetry<Req, Ctx> {
    ready_at: Instant,
    /// Insertion order, breaks ties between equal `ready_at`.
    seq: u64,
    attempt: Attempt<Req, Ctx>,
}

impl<Req, Ctx> PartialEq for ScheduledRetry<Req, Ctx> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<Req, Ctx> Eq for ScheduledRetry<Req, Ctx> {}

impl<Req, Ctx> PartialOrd for ScheduledRetry<Req, Ctx> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Req, Ctx> Ord for ScheduledRetry<Req, Ctx> {
    // Reversed: BinaryHeap is a max-heap, the earliest entry must be on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduled retries plus the FIFO of retries whose delay has elapsed.
///
/// One timer, armed for the earliest scheduled entry, drives promotion.
pub(crate) struct RetryQueue<Req, Ctx> {
    scheduled: BinaryHeap<ScheduledRetry<Req, Ctx>>,
    ready: VecDeque<Attempt<Req, Ctx>>,
    next_seq: u64,
    timer: Option<Pin<Box<Sleep>>>,
}

impl<Req, Ctx> RetryQueue<Req, Ctx> {
    pub(crate) fn new() -> Self {
        Self {
            scheduled: BinaryHeap::new(),
            ready: VecDeque::new(),
            next_seq: 0,
            timer: None,
        }
    }

    /// Retries not yet resubmitted, waiting or ready.
    pub(crate) fn len(&self) -> usize {
        self.scheduled.len() + self.ready.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn schedule(&mut self, attempt: Attempt<Req, Ctx>, delay: Duration, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.push(ScheduledRetry {
            ready_at: now + delay,
            seq,
            attempt,
        });
    }

    /// Move every entry due at `now` to the ready FIFO, earliest first.
    pub(crate) fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while self
            .scheduled
            .peek()
            .is_some_and(|entry| entry.ready_at <= now)
        {
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.attempt);
                promoted += 1;
            }
        }
        promoted
    }

    pub(crate) fn pop_ready(&mut self) -> Option<Attempt<Req, Ctx>> {
        self.ready.pop_front()
    }

    /// Wait for the earliest scheduled entry.
    ///
    /// Ready once at least one entry has been promoted. Pending without a
    /// registered waker when nothing is scheduled.
    pub(crate) fn poll_timer(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let Some(next) = self.scheduled.peek().map(|entry| entry.ready_at) else {
            self.timer = None;
            return Poll::Pending;
        };

        let timer = self
            .timer
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(next)));
        if timer.deadline() != next {
            timer.as_mut().reset(next);
        }

        match timer.as_mut().poll(cx) {
            Poll::Ready(()) => {
                let fired = timer.deadline();
                self.promote_due(Instant::now().max(fired));
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Discard everything, timer included.
    pub(crate) fn clear(&mut self) {
        self.scheduled.clear();
        self.ready.clear();
        self.timer = None;
    }
}

impl<Req, Ctx> std::fmt::Debug for RetryQueue<Req, Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryQueue")
            .field("scheduled", &self.scheduled.len())
            .field("ready", &self.ready.len())
            .field("next_deadline", &self.scheduled.peek().map(|e| e.ready_at))
            .finish()
    }
}
