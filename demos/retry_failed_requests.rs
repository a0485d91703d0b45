//! Retry Failed Requests Example
//!
//! Demonstrates the common "retry until accepted" shape:
//! - a flaky write endpoint that throttles some calls
//! - a fallible classifier that treats unknown statuses as fatal
//! - an observability hook on every scheduled retry
//! - exhaustion handling with `ExhaustionPolicy`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use retryflow::prelude::*;
use retryflow::RetryEvent;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Status {
    Ok,
    Throttled,
    Teapot,
}

#[derive(Debug, Clone)]
struct Put {
    key: u32,
    tries_left_throttled: u32,
}

#[derive(Debug)]
struct PutResponse {
    key: u32,
    status: Status,
    tries_left_throttled: u32,
}

async fn put(request: Put) -> Result<PutResponse, std::io::Error> {
    tokio::time::sleep(Duration::from_millis(2)).await;
    let (status, tries_left_throttled) = match request.tries_left_throttled {
        0 if request.key == 418 => (Status::Teapot, 0),
        0 => (Status::Ok, 0),
        n => (Status::Throttled, n - 1),
    };
    Ok(PutResponse {
        key: request.key,
        status,
        tries_left_throttled,
    })
}

fn work(keys: &[(u32, u32)]) -> impl futures::Stream<Item = WorkItem<Put, u32>> + '_ {
    stream::iter(keys.iter().map(|&(key, throttled)| {
        WorkItem::new(
            Put {
                key,
                tries_left_throttled: throttled,
            },
            key,
        )
    }))
}

/// Example 1: retry throttled writes and log each scheduled retry.
async fn example_retry_throttled() {
    println!("\n=== Example 1: Retry Throttled Writes ===");

    let scheduled = Arc::new(AtomicU32::new(0));
    let classifier = |resp: &PutResponse, key: &u32| match resp.status {
        Status::Throttled => Decision::retry(
            Put {
                key: *key,
                tries_left_throttled: resp.tries_left_throttled,
            },
            *key,
        ),
        _ => Decision::Done,
    };

    let builder = RetryFlowBuilder::new(put, classifier)
        .policy(
            RetryPolicy::exponential(Duration::from_millis(20))
                .with_max_attempts(5)
                .with_max_delay(Duration::from_millis(500))
                .with_jitter(0.25),
        )
        .parallelism(4)
        .on_retry({
            let scheduled = scheduled.clone();
            move |event: &RetryEvent<'_, PutResponse>| {
                scheduled.fetch_add(1, Ordering::SeqCst);
                match event.next_delay {
                    Some(delay) => println!(
                        "  key {} throttled on attempt {}, retrying in {:?}",
                        event.response.key,
                        event.attempt + 1,
                        delay
                    ),
                    None => println!("  key {} gave up", event.response.key),
                }
            }
        });

    let keys = [(1, 0), (2, 2), (3, 1), (4, 7)];
    let flow = match work(&keys).retry_with(builder) {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return;
        }
    };

    let results: Vec<_> = flow.collect().await;
    for result in results {
        match result {
            Ok(outcome) if outcome.exhausted => println!(
                "key {}: still {:?} after {} attempts",
                outcome.context, outcome.response.status, outcome.attempts
            ),
            Ok(outcome) => println!(
                "key {}: {:?} after {} attempt(s)",
                outcome.context, outcome.response.status, outcome.attempts
            ),
            Err(e) => println!("flow failed: {}", e),
        }
    }
    println!("hook fired {} times", scheduled.load(Ordering::SeqCst));
}

/// Example 2: unknown statuses abort the whole flow.
async fn example_fatal_classification() {
    println!("\n=== Example 2: Fatal Classification ===");

    let classifier = try_classifier(|resp: &PutResponse, key: &u32| match resp.status {
        Status::Ok => Ok(Decision::Done),
        Status::Throttled => Ok(Decision::retry(
            Put {
                key: *key,
                tries_left_throttled: resp.tries_left_throttled,
            },
            *key,
        )),
        Status::Teapot => Err(format!("key {} answered with a teapot", key)),
    });

    let keys = [(1, 0), (418, 0), (2, 0)];
    let policy = RetryPolicy::exponential(Duration::from_millis(20)).with_max_attempts(3);
    let mut flow = match work(&keys).retry_flow(put, classifier, policy, 1) {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return;
        }
    };

    while let Some(result) = flow.next().await {
        match result {
            Ok(outcome) => println!("key {}: {:?}", outcome.context, outcome.response.status),
            Err(RetryFlowError::Classifier(msg)) => println!("aborted: {}", msg),
            Err(e) => println!("aborted: {}", e),
        }
    }
}

/// Example 3: fail the flow instead of emitting exhausted outcomes.
async fn example_fail_on_exhaustion() {
    println!("\n=== Example 3: Fail On Exhaustion ===");

    let classifier = |resp: &PutResponse, key: &u32| match resp.status {
        Status::Throttled => Decision::retry(
            Put {
                key: *key,
                tries_left_throttled: resp.tries_left_throttled,
            },
            *key,
        ),
        _ => Decision::Done,
    };

    let policy = RetryPolicy::exponential(Duration::from_millis(10))
        .with_max_attempts(2)
        .with_max_delay(Duration::from_millis(100))
        .with_exhaustion(ExhaustionPolicy::Fail);

    let keys = [(7, 10)];
    let flow = match work(&keys).retry_flow(put, classifier, policy, 1) {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return;
        }
    };

    let results: Vec<_> = flow.collect().await;
    match results.last() {
        Some(Err(e)) if e.is_exhausted() => println!("flow failed as configured: {}", e),
        other => println!("unexpected: {:?}", other),
    }
}

#[tokio::main]
async fn main() {
    println!("======================================");
    println!("     Retry Failed Requests Example    ");
    println!("======================================");

    example_retry_throttled().await;
    example_fatal_classification().await;
    example_fail_on_exhaustion().await;

    println!("\n======================================");
    println!("           Examples Complete           ");
    println!("======================================");
}
