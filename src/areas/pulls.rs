//! Pull request throughput, cycle time and review latency.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

use super::{field, text, text_or};
use crate::client::PageOptions;
use crate::models::AreaResult;
use crate::stats::{self, AgingBuckets};
use crate::traits::{AreaContext, AreaFetcher};

const MAX_OPEN_DETAILS: usize = 20;

pub struct PullRequests;

#[async_trait]
impl AreaFetcher for PullRequests {
    fn name(&self) -> &str {
        "prs"
    }

    fn description(&self) -> &str {
        "Pull requests opened, merged and closed; cycle and review time"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching pull requests");
        let lookback = ctx.lookback();
        let prs = ctx
            .client()
            .paginate_while(
                &ctx.repo_path("/pulls?state=all&sort=updated&direction=desc"),
                &PageOptions::max_pages(5),
                |pr| updated_since(pr, lookback),
            )
            .await?;

        let mut summary = summarize(&prs, ctx.now());

        let mut review_hours = Vec::new();
        for pr in summary.merged.iter().take(ctx.settings().max_review_prs) {
            let Some(number) = pr["number"].as_u64() else {
                continue;
            };
            let reviews = ctx
                .client()
                .get_json(&ctx.repo_path(&format!("/pulls/{}/reviews", number)))
                .await?;
            if let Some(hours) = first_review_hours(pr, reviews.as_ref()) {
                review_hours.push(hours);
            }
        }
        summary.review_median = stats::round1(stats::median(&review_hours));

        Ok(summary.into_result())
    }
}

/// Whether an item was updated at or after `since`. Unparseable timestamps
/// count as outside the window.
pub(crate) fn updated_since(item: &Value, since: DateTime<Utc>) -> bool {
    stats::parse_time(item.get("updated_at")).is_some_and(|t| t >= since)
}

struct Summary<'a> {
    total: usize,
    open: Vec<&'a Value>,
    merged: Vec<&'a Value>,
    closed_unmerged: usize,
    cycle_median: f64,
    review_median: f64,
    aging: AgingBuckets,
}

fn summarize(prs: &[Value], now: DateTime<Utc>) -> Summary<'_> {
    let open: Vec<&Value> = prs.iter().filter(|pr| pr["state"] == "open").collect();
    let merged: Vec<&Value> = prs
        .iter()
        .filter(|pr| text(pr, "/merged_at").is_some())
        .collect();
    let closed_unmerged = prs
        .iter()
        .filter(|pr| pr["state"] == "closed" && text(pr, "/merged_at").is_none())
        .count();

    let cycle_hours: Vec<f64> = merged
        .iter()
        .filter_map(|pr| {
            let created = stats::parse_time(pr.get("created_at"))?;
            let merged = stats::parse_time(pr.get("merged_at"))?;
            Some(stats::hours_between(created, merged))
        })
        .collect();

    let mut aging = AgingBuckets::default();
    for pr in &open {
        if let Some(created) = stats::parse_time(pr.get("created_at")) {
            aging.add(stats::days_between(created, now));
        }
    }

    Summary {
        total: prs.len(),
        open,
        merged,
        closed_unmerged,
        cycle_median: stats::round1(stats::median(&cycle_hours)),
        review_median: 0.0,
        aging,
    }
}

impl Summary<'_> {
    fn into_result(self) -> AreaResult {
        let open_details: Vec<Value> = self
            .open
            .iter()
            .take(MAX_OPEN_DETAILS)
            .map(|pr| {
                let labels: Vec<Value> = pr["labels"]
                    .as_array()
                    .map(|labels| labels.iter().map(|l| field(l, "/name")).collect())
                    .unwrap_or_default();
                json!({
                    "number": field(pr, "/number"),
                    "title": field(pr, "/title"),
                    "author": text_or(pr, "/user/login", "unknown"),
                    "createdAt": field(pr, "/created_at"),
                    "updatedAt": field(pr, "/updated_at"),
                    "labels": labels,
                    "url": field(pr, "/html_url"),
                })
            })
            .collect();

        AreaResult::new()
            .metric("prs_opened", self.total)
            .metric("prs_merged", self.merged.len())
            .metric("prs_closed", self.closed_unmerged)
            .metric("prs_open_count", self.open.len())
            .metric("pr_cycle_time_median_hours", self.cycle_median)
            .metric("pr_review_time_median_hours", self.review_median)
            .detail("openPrs", open_details)
            .detail("prAgingBuckets", self.aging.to_json())
    }
}

/// Hours from PR creation to its earliest submitted review.
fn first_review_hours(pr: &Value, reviews: Option<&Value>) -> Option<f64> {
    let first = reviews?
        .as_array()?
        .iter()
        .filter_map(|r| stats::parse_time(r.get("submitted_at")))
        .min()?;
    let created = stats::parse_time(pr.get("created_at"))?;
    Some(stats::hours_between(created, first))
}
