//! Batch Get Example
//!
//! Drives a simulated batch key lookup through a retry flow. The backend
//! only serves a few keys per call and reports the rest as unprocessed; the
//! classifier narrows each follow-up request to those leftover keys.
//!
//! Scheduling decisions are logged at debug level.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::{stream, StreamExt};
use retryflow::prelude::*;

#[derive(Debug, Clone)]
struct BatchGetRequest {
    keys: Vec<String>,
}

#[derive(Debug)]
struct BatchGetResponse {
    items: BTreeMap<String, u64>,
    unprocessed_keys: Vec<String>,
}

/// A table that returns at most `per_call` items per request.
async fn batch_get(request: BatchGetRequest, per_call: usize) -> Result<BatchGetResponse, String> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    let served = request.keys.len().min(per_call);
    let (done, rest) = request.keys.split_at(served);
    Ok(BatchGetResponse {
        items: done
            .iter()
            .map(|key| (key.clone(), key.len() as u64 * 100))
            .collect(),
        unprocessed_keys: rest.to_vec(),
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .init();

    println!("======================================");
    println!("          Batch Get Example           ");
    println!("======================================");

    let batches = vec![
        ("users", vec!["ada", "grace", "linus", "barbara", "ken"]),
        ("orders", vec!["o-1", "o-2", "o-3"]),
        ("carts", vec!["c-1"]),
    ];

    let work = stream::iter(batches).map(|(table, keys)| {
        WorkItem::new(
            BatchGetRequest {
                keys: keys.into_iter().map(String::from).collect(),
            },
            table,
        )
    });

    let classifier = |resp: &BatchGetResponse, table: &&'static str| {
        if resp.unprocessed_keys.is_empty() {
            Decision::Done
        } else {
            Decision::retry(
                BatchGetRequest {
                    keys: resp.unprocessed_keys.clone(),
                },
                *table,
            )
        }
    };

    let policy = RetryPolicy::exponential(Duration::from_millis(10))
        .with_max_attempts(8)
        .with_max_delay(Duration::from_secs(5))
        .with_jitter(0.2);

    let flow = match work.retry_flow(
        |request: BatchGetRequest| batch_get(request, 2),
        classifier,
        policy,
        2,
    ) {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return;
        }
    };

    let results: Vec<_> = flow.collect().await;
    for result in results {
        match result {
            Ok(outcome) => println!(
                "{:>8}: last call returned {:?} after {} attempt(s){}",
                outcome.context,
                outcome.response.items.keys().collect::<Vec<_>>(),
                outcome.attempts,
                if outcome.exhausted { " (exhausted)" } else { "" }
            ),
            Err(e) => println!("flow failed: {}", e),
        }
    }
}
