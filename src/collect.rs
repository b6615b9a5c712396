//! Collection orchestration.
//!
//! Runs the requested areas against one repository and folds their results
//! into a single snapshot:
//!
//! ```text
//! requested areas ──► registry lookup ──► JoinSet (≤ concurrency)
//!                                              │
//!            ┌─────────────────────────────────┘
//!            ▼
//!   per-area AreaResult (or warning) ──► merge in requested order ──► Collection
//! ```
//!
//! Failure policy:
//!
//! | Outcome of an area          | Effect |
//! |-----------------------------|--------|
//! | `Ok(result)`                | merged |
//! | error or panic              | warning, area contributes nothing |
//! | `RateLimitExceeded`         | every other area is aborted, run fails |
//! | unknown name                | warning, skipped |
//!
//! Merging walks the *requested* order regardless of completion order, so a
//! metric produced by two areas always resolves to the later area's value.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::is_rate_limit;
use crate::models::{AreaResult, DetailPayload, MetricSnapshot};
use crate::traits::{AreaRegistry, RunContext};

/// Merged output of one collection run.
#[derive(Debug, Default)]
pub struct Collection {
    pub metrics: MetricSnapshot,
    pub details: DetailPayload,
    /// HTTP requests issued by all areas together.
    pub request_count: u64,
    /// Areas that returned a result, in requested order.
    pub areas_succeeded: Vec<String>,
    /// Areas that errored or panicked, in requested order.
    pub areas_failed: Vec<String>,
}

enum Outcome {
    Done(AreaResult),
    Failed,
}

/// Run `areas` with at most `concurrency` in flight.
///
/// Returns `Err` only when the API quota is exhausted.
pub async fn collect(
    areas: &[String],
    registry: &AreaRegistry,
    run: Arc<RunContext>,
    concurrency: usize,
) -> Result<Collection> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut task_areas = HashMap::new();
    let mut outcomes: Vec<Option<Outcome>> = Vec::with_capacity(areas.len());
    // Handles sharing each area's counter, read after the task is gone so a
    // panicking area still has its requests counted.
    let mut counters: Vec<ApiClient> = Vec::with_capacity(areas.len());

    for (idx, name) in areas.iter().enumerate() {
        outcomes.push(None);
        let Some(fetcher) = registry.find(name) else {
            warn!(area = %name, "unknown area, skipping");
            continue;
        };

        let ctx = run.for_area();
        counters.push(ctx.client().clone());
        let semaphore = Arc::clone(&semaphore);
        let handle = tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => fetcher.fetch(&ctx).await,
                Err(e) => Err(e.into()),
            };
            (idx, result, ctx.request_count())
        });
        task_areas.insert(handle.id(), idx);
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Ok(result), requests)) => {
                info!(area = %areas[idx], requests, "area complete");
                outcomes[idx] = Some(Outcome::Done(result));
            }
            Ok((idx, Err(e), _)) => {
                if is_rate_limit(&e) {
                    tasks.abort_all();
                    return Err(e.context(format!("area '{}' hit the rate limit", areas[idx])));
                }
                warn!(area = %areas[idx], error = %format!("{:#}", e), "failed to fetch area");
                outcomes[idx] = Some(Outcome::Failed);
            }
            Err(join_err) => {
                let Some(&idx) = task_areas.get(&join_err.id()) else {
                    continue;
                };
                warn!(area = %areas[idx], error = %join_err, "area task panicked");
                outcomes[idx] = Some(Outcome::Failed);
            }
        }
    }

    let request_count = counters.iter().map(ApiClient::request_count).sum();
    let mut collection = Collection {
        request_count,
        ..Collection::default()
    };
    for (name, outcome) in areas.iter().zip(outcomes) {
        match outcome {
            Some(Outcome::Done(result)) => {
                collection.metrics.extend(result.metrics);
                collection.details.extend(result.details);
                collection.areas_succeeded.push(name.clone());
            }
            Some(Outcome::Failed) => collection.areas_failed.push(name.clone()),
            None => {}
        }
    }

    info!(
        succeeded = collection.areas_succeeded.len(),
        failed = collection.areas_failed.len(),
        requests = collection.request_count,
        "collection finished"
    );
    Ok(collection)
}
