//! Behavioural tests for the retry coordinator.

use super::*;
use crate::retry::{ExhaustionPolicy, RetryFlowError, RetryPolicy};
use crate::testing::{collect_outcomes, MockStage, StageFault};
use futures::stream::FusedStream;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::exponential(ms(10))
        .with_max_attempts(max_attempts)
        .with_max_delay(Duration::from_secs(5))
}

fn items(n: u32) -> impl futures::Stream<Item = WorkItem<u32, u32>> {
    stream::iter((0..n).map(|i| WorkItem::new(i, i)))
}

fn done(_: &u32, _: &u32) -> Decision<u32, u32> {
    Decision::Done
}

fn always_retry(_: &u32, ctx: &u32) -> Decision<u32, u32> {
    Decision::retry(*ctx, *ctx)
}

/// Responds with the 1-based call number.
fn counting_stage() -> MockStage<u32, u32> {
    let calls = AtomicU32::new(0);
    MockStage::new(move |_: &u32| Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
}

#[tokio::test(start_paused = true)]
async fn all_done_emits_every_item_with_its_context() {
    let stage = MockStage::new(|n: &u32| Ok(n * 100));
    let probe = stage.clone();

    let flow = items(20).retry_flow(stage, done, policy(3), 4).unwrap();
    let mut outcomes = collect_outcomes(flow).await.unwrap();
    outcomes.sort_by_key(|o| o.context);

    assert_eq!(outcomes.len(), 20);
    for (i, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.context, i as u32);
        assert_eq!(outcome.response, i as u32 * 100);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.exhausted);
    }
    assert_eq!(probe.submission_count(), 20);
}

#[tokio::test(start_paused = true)]
async fn all_done_adds_no_delay() {
    let start = tokio::time::Instant::now();
    let stage = MockStage::new(|n: &u32| Ok(*n)).with_latency(ms(5));

    let flow = items(4).retry_flow(stage, done, policy(3), 4).unwrap();
    collect_outcomes(flow).await.unwrap();

    assert!(start.elapsed() < ms(10), "took {:?}", start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn retries_k_times_then_done() {
    let stage = counting_stage();
    let probe = stage.clone();
    let classifier = |resp: &u32, ctx: &u32| {
        if *resp <= 3 {
            Decision::retry(*ctx, *ctx)
        } else {
            Decision::Done
        }
    };

    let flow = items(1).retry_flow(stage, classifier, policy(5), 1).unwrap();
    let outcomes = collect_outcomes(flow).await.unwrap();

    assert_eq!(probe.submission_count(), 4);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].response, 4);
    assert_eq!(outcomes[0].attempts, 4);
    assert!(!outcomes[0].exhausted);
}

#[tokio::test(start_paused = true)]
async fn always_retry_stops_after_max_attempts_plus_one() {
    let stage = counting_stage();
    let probe = stage.clone();

    let flow = items(1)
        .retry_flow(stage, always_retry, policy(3), 1)
        .unwrap();
    let outcomes = collect_outcomes(flow).await.unwrap();

    assert_eq!(probe.submission_count(), 4);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].response, 4);
    assert_eq!(outcomes[0].attempts, 4);
    assert!(outcomes[0].exhausted);
}

fn fan_out_three(resp: &u32, ctx: &u32) -> Decision<u32, u32> {
    Decision::retry_with((1..=3).map(|n| WorkItem::new(resp * 10 + n, ctx * 10 + n)))
}

#[tokio::test(start_paused = true)]
async fn exhausted_fan_out_emits_one_outcome_per_response() {
    let stage = MockStage::new(|n: &u32| Ok(*n));
    let probe = stage.clone();
    let exhaustions = Arc::new(AtomicUsize::new(0));

    let flow = RetryFlowBuilder::new(stage, fan_out_three)
        .policy(policy(0))
        .on_retry({
            let exhaustions = exhaustions.clone();
            move |event: &crate::RetryEvent<'_, u32>| {
                if event.next_delay.is_none() {
                    exhaustions.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .build(stream::iter(vec![WorkItem::new(7, 1)]))
        .unwrap();
    let outcomes = collect_outcomes(flow).await.unwrap();

    assert_eq!(
        outcomes,
        vec![Outcome {
            response: 7,
            context: 1,
            attempts: 1,
            exhausted: true,
        }]
    );
    assert_eq!(probe.submission_count(), 1);
    assert_eq!(exhaustions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fan_out_exhausts_each_branch_once() {
    let stage = MockStage::new(|n: &u32| Ok(*n));
    let probe = stage.clone();

    let flow = items(1)
        .retry_flow(stage, fan_out_three, policy(1), 3)
        .unwrap();
    let mut outcomes = collect_outcomes(flow).await.unwrap();
    outcomes.sort_by_key(|o| o.context);

    // One initial submission, then three follow-ups that each exhaust.
    assert_eq!(probe.submission_count(), 4);
    let got: Vec<_> = outcomes
        .iter()
        .map(|o| (o.response, o.context, o.attempts, o.exhausted))
        .collect();
    assert_eq!(
        got,
        vec![(1, 1, 2, true), (2, 2, 2, true), (3, 3, 2, true)]
    );
}

#[tokio::test(start_paused = true)]
async fn zero_max_attempts_is_pass_through() {
    let stage = counting_stage();
    let probe = stage.clone();

    let flow = items(3)
        .retry_flow(stage, always_retry, policy(0), 1)
        .unwrap();
    let outcomes = collect_outcomes(flow).await.unwrap();

    assert_eq!(probe.submission_count(), 3);
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.exhausted && o.attempts == 1));
}

#[derive(Debug, Clone, PartialEq)]
struct BatchResponse {
    items: Vec<u32>,
    remaining: Vec<u32>,
}

#[tokio::test(start_paused = true)]
async fn unprocessed_keys_are_resubmitted_once_after_20ms() {
    let stage = MockStage::new(|keys: &Vec<u32>| {
        // The backend leaves the last key of a multi-key batch unprocessed.
        let processed = if keys.len() > 1 { keys.len() - 1 } else { keys.len() };
        let (done, rest) = keys.split_at(processed);
        Ok(BatchResponse {
            items: done.to_vec(),
            remaining: rest.to_vec(),
        })
    });
    let probe = stage.clone();
    let classifier = |resp: &BatchResponse, ctx: &&'static str| {
        if resp.remaining.is_empty() {
            Decision::Done
        } else {
            Decision::retry(resp.remaining.clone(), *ctx)
        }
    };
    let delays = Arc::new(Mutex::new(Vec::new()));

    let flow = RetryFlowBuilder::new(stage, classifier)
        .policy(
            RetryPolicy::exponential(ms(10))
                .with_max_attempts(8)
                .with_max_delay(Duration::from_secs(5))
                .with_jitter(0.0),
        )
        .on_retry({
            let delays = delays.clone();
            move |event: &crate::RetryEvent<'_, BatchResponse>| {
                delays.lock().unwrap().push(event.next_delay);
            }
        })
        .build(stream::iter(vec![WorkItem::new(vec![1, 2], "batch")]))
        .unwrap();
    let outcomes = collect_outcomes(flow).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].context, "batch");
    assert_eq!(outcomes[0].attempts, 2);
    assert!(outcomes[0].response.remaining.is_empty());
    assert_eq!(*delays.lock().unwrap(), vec![Some(ms(20))]);

    let submissions = probe.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[1].request, vec![2]);
    let gap = submissions[1].at - submissions[0].at;
    assert!(gap >= ms(20) && gap < ms(25), "gap was {:?}", gap);
}

#[tokio::test(start_paused = true)]
async fn empty_retry_with_drops_branch() {
    let stage = MockStage::new(|n: &u32| Ok(*n));
    let probe = stage.clone();
    let classifier = |_: &u32, ctx: &u32| {
        if ctx % 2 == 0 {
            Decision::drop_branch()
        } else {
            Decision::Done
        }
    };

    let flow = items(6).retry_flow(stage, classifier, policy(3), 2).unwrap();
    let mut contexts: Vec<_> = collect_outcomes(flow)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.context)
        .collect();
    contexts.sort();

    assert_eq!(contexts, vec![1, 3, 5]);
    assert_eq!(probe.submission_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn follow_ups_fan_out_with_their_own_context() {
    let stage = MockStage::new(|n: &u32| Ok(*n));
    let classifier = |resp: &u32, ctx: &u32| {
        if *ctx == 0 {
            Decision::retry_with((1..=3).map(|n| WorkItem::new(resp + n, n * 10)))
        } else {
            Decision::Done
        }
    };

    let flow = items(1).retry_flow(stage, classifier, policy(3), 2).unwrap();
    let mut outcomes = collect_outcomes(flow).await.unwrap();
    outcomes.sort_by_key(|o| o.context);

    let got: Vec<_> = outcomes
        .iter()
        .map(|o| (o.response, o.context, o.attempts))
        .collect();
    assert_eq!(got, vec![(1, 10, 2), (2, 20, 2), (3, 30, 2)]);
}

#[tokio::test(start_paused = true)]
async fn output_follows_completion_not_submission_order() {
    let stage = MockStage::new(|n: &u32| Ok(*n)).with_latency_fn(|n| ms(30 - *n as u64 * 10));

    let flow = items(3).retry_flow(stage, done, policy(0), 3).unwrap();
    let order: Vec<_> = collect_outcomes(flow)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.context)
        .collect();

    assert_eq!(order, vec![2, 1, 0]);
}

#[tokio::test(start_paused = true)]
async fn in_flight_never_exceeds_parallelism() {
    let stage = MockStage::new(|n: &u32| Ok(*n)).with_latency_fn(|n| ms(1 + (*n as u64 % 7)));
    let probe = stage.clone();
    let seen = Arc::new(AtomicU32::new(0));
    let classifier = {
        let seen = seen.clone();
        move |_: &u32, ctx: &u32| {
            // Every third response asks for one more round.
            if seen.fetch_add(1, Ordering::SeqCst) % 3 == 0 {
                Decision::retry(*ctx, *ctx)
            } else {
                Decision::Done
            }
        }
    };

    let flow = items(50).retry_flow(stage, classifier, policy(4), 3).unwrap();
    let outcomes = collect_outcomes(flow).await.unwrap();

    assert_eq!(outcomes.len(), 50);
    assert_eq!(probe.peak_in_flight(), 3);
    assert!(probe.submission_count() > 50);
}

#[tokio::test(start_paused = true)]
async fn stage_fault_aborts_the_flow() {
    let stage = MockStage::new(|n: &u32| {
        if *n == 3 {
            Err(StageFault("stage closed".into()))
        } else {
            Ok(*n)
        }
    });
    let probe = stage.clone();

    let mut flow = items(10).retry_flow(stage, done, policy(3), 1).unwrap();
    let mut results = Vec::new();
    while let Some(item) = flow.next().await {
        results.push(item);
    }

    assert_eq!(results.len(), 4);
    assert!(results[..3].iter().all(|r| r.is_ok()));
    assert_eq!(
        results[3],
        Err(RetryFlowError::Stage(StageFault("stage closed".into())))
    );
    assert!(flow.is_terminated());
    assert_eq!(probe.submission_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn stage_fault_discards_scheduled_retries() {
    let stage = MockStage::new(|n: &u32| {
        if *n == 1 {
            Err(StageFault("gone".into()))
        } else {
            Ok(*n)
        }
    })
    .with_latency_fn(|n| ms(*n as u64 * 5));
    let probe = stage.clone();
    let classifier = |_: &u32, ctx: &u32| Decision::retry(*ctx, *ctx);

    let flow = items(2).retry_flow(stage, classifier, policy(5), 2).unwrap();
    let err = collect_outcomes(flow).await.unwrap_err();
    assert!(err.is_stage());

    // Item 0 had a retry scheduled 20ms out; it must never be submitted.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(probe.requests(), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn classifier_fault_aborts_the_flow() {
    let stage = MockStage::new(|n: &u32| Ok(*n));
    let classifier = try_classifier(|resp: &u32, _: &u32| {
        if *resp == 2 {
            Err(format!("cannot classify {}", resp))
        } else {
            Ok(Decision::<u32, u32>::Done)
        }
    });

    let flow = items(5).retry_flow(stage, classifier, policy(3), 1).unwrap();
    let err = collect_outcomes(flow).await.unwrap_err();

    assert_eq!(err, RetryFlowError::Classifier("cannot classify 2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn exhaustion_can_fail_the_flow() {
    let stage = counting_stage();
    let probe = stage.clone();

    let flow = items(1)
        .retry_flow(
            stage,
            always_retry,
            policy(2).with_exhaustion(ExhaustionPolicy::Fail),
            1,
        )
        .unwrap();
    let err = collect_outcomes(flow).await.unwrap_err();

    assert_eq!(err, RetryFlowError::Exhausted { attempts: 3 });
    assert_eq!(probe.submission_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn hook_sees_exhaustion() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let flow = RetryFlowBuilder::new(counting_stage(), always_retry)
        .policy(policy(2))
        .on_retry({
            let events = events.clone();
            move |event: &crate::RetryEvent<'_, u32>| {
                events
                    .lock()
                    .unwrap()
                    .push((event.attempt, *event.response, event.next_delay));
            }
        })
        .build(items(1))
        .unwrap();
    collect_outcomes(flow).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![(0, 1, Some(ms(20))), (1, 2, Some(ms(40))), (2, 3, None)]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_consumer_pauses_upstream() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let upstream = stream::iter(0u32..)
        .inspect({
            let pulled = pulled.clone();
            move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            }
        })
        .map(|n| WorkItem::new(n, n));
    let stage = MockStage::new(|n: &u32| Ok(*n)).with_latency(ms(10));

    let mut flow = upstream.retry_flow(stage, done, policy(0), 3).unwrap();

    assert!(flow.next().await.is_some());
    assert_eq!(pulled.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), 3);

    assert!(flow.next().await.is_some());
    assert_eq!(pulled.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn pending_retries_pause_upstream() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let upstream = stream::iter(0u32..4)
        .inspect({
            let pulled = pulled.clone();
            move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            }
        })
        .map(|n| WorkItem::new(n, n));
    let stage = counting_stage();
    // Only the very first response is retried.
    let classifier = |resp: &u32, ctx: &u32| {
        if *resp == 1 {
            Decision::retry(*ctx, *ctx)
        } else {
            Decision::Done
        }
    };

    let mut flow = RetryFlowBuilder::new(stage, classifier)
        .policy(policy(3))
        .parallelism(1)
        .retry_capacity(1)
        .build(upstream)
        .unwrap();

    // The retry of item 0 is scheduled 20ms out and blocks admission.
    let _ = tokio::time::timeout(ms(5), flow.next()).await;
    assert_eq!(flow.pending_retries(), 1);
    assert_eq!(pulled.load(Ordering::SeqCst), 1);

    let first = flow.next().await.unwrap().unwrap();
    assert_eq!(first.context, 0);
    assert_eq!(first.attempts, 2);

    let rest = collect_outcomes(flow).await.unwrap();
    assert_eq!(rest.len(), 3);
    assert_eq!(pulled.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn cancel_abandons_scheduled_retries() {
    let stage = counting_stage();
    let probe = stage.clone();

    let mut flow = items(1)
        .retry_flow(stage, always_retry, policy(5), 1)
        .unwrap();
    let _ = tokio::time::timeout(ms(5), flow.next()).await;
    assert_eq!(flow.pending_retries(), 1);

    flow.cancel();
    assert!(flow.next().await.is_none());
    assert!(flow.is_terminated());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(probe.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_flow_abandons_in_flight_work() {
    let stage = MockStage::new(|n: &u32| Ok(*n)).with_latency(ms(100));
    let probe = stage.clone();

    let mut flow = items(3).retry_flow(stage, done, policy(3), 2).unwrap();
    let _ = tokio::time::timeout(ms(5), flow.next()).await;
    assert_eq!(flow.in_flight(), 2);
    assert_eq!(probe.in_flight(), 2);

    drop(flow);
    assert_eq!(probe.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn seeded_jitter_is_reproducible() {
    async fn delays(seed: u64) -> Vec<Option<Duration>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let flow = RetryFlowBuilder::new(counting_stage(), always_retry)
            .policy(policy(4).with_jitter(0.5))
            .seed(seed)
            .on_retry({
                let seen = seen.clone();
                move |event: &crate::RetryEvent<'_, u32>| {
                    seen.lock().unwrap().push(event.next_delay);
                }
            })
            .build(items(1))
            .unwrap();
        collect_outcomes(flow).await.unwrap();
        let out = seen.lock().unwrap().clone();
        out
    }

    assert_eq!(delays(11).await, delays(11).await);
}

#[cfg(feature = "tracing")]
#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn retries_and_exhaustion_are_logged() {
    let flow = items(1)
        .retry_flow(counting_stage(), always_retry, policy(1), 1)
        .unwrap();
    collect_outcomes(flow).await.unwrap();

    assert!(logs_contain("retry scheduled"));
    assert!(logs_contain("retry attempts exhausted"));
}

#[tokio::test]
async fn empty_upstream_ends_immediately() {
    let flow = items(0).retry_flow(counting_stage(), done, policy(3), 2).unwrap();
    assert!(collect_outcomes(flow).await.unwrap().is_empty());
}
