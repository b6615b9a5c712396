//! Issue activity and backlog age.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use super::pulls::updated_since;
use super::present;
use crate::client::PageOptions;
use crate::models::AreaResult;
use crate::stats::{self, AgingBuckets};
use crate::traits::{AreaContext, AreaFetcher};

pub struct Issues;

#[async_trait]
impl AreaFetcher for Issues {
    fn name(&self) -> &str {
        "issues"
    }

    fn description(&self) -> &str {
        "Issues opened and closed, open backlog and its age"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching issues");
        let lookback = ctx.lookback();
        let items = ctx
            .client()
            .paginate_while(
                &ctx.repo_path("/issues?state=all&sort=updated&direction=desc"),
                &PageOptions::max_pages(5),
                |item| updated_since(item, lookback),
            )
            .await?;

        let repo_open = ctx
            .repository()
            .await?
            .and_then(|r| r["open_issues_count"].as_i64());

        Ok(summarize(&items, repo_open, ctx.now()))
    }
}

fn summarize(items: &[Value], repo_open: Option<i64>, now: DateTime<Utc>) -> AreaResult {
    // The issues endpoint also lists pull requests.
    let issues: Vec<&Value> = items
        .iter()
        .filter(|item| !present(item, "/pull_request"))
        .collect();
    let open: Vec<&Value> = issues
        .iter()
        .copied()
        .filter(|i| i["state"] == "open")
        .collect();
    let closed = issues.iter().filter(|i| i["state"] == "closed").count();

    let mut aging = AgingBuckets::default();
    for issue in &open {
        if let Some(created) = stats::parse_time(issue.get("created_at")) {
            aging.add(stats::days_between(created, now));
        }
    }

    let open_count = repo_open.unwrap_or(open.len() as i64);

    AreaResult::new()
        .metric("issues_opened", issues.len())
        .metric("issues_closed", closed)
        .metric("issues_open_count", open_count)
        .detail("issueAgingBuckets", aging.to_json())
}
