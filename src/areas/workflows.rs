//! CI health from GitHub Actions workflow runs.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

use super::text;
use crate::client::PageOptions;
use crate::models::AreaResult;
use crate::stats;
use crate::traits::{AreaContext, AreaFetcher};

pub struct Workflows;

#[async_trait]
impl AreaFetcher for Workflows {
    fn name(&self) -> &str {
        "workflows"
    }

    fn description(&self) -> &str {
        "Workflow run success rate and duration percentiles"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching workflow runs");
        let since = ctx.lookback().format("%Y-%m-%d");
        let runs = ctx
            .client()
            .paginate(
                &ctx.repo_path(&format!("/actions/runs?created=>{}", since)),
                &PageOptions::max_pages(5).items_key("workflow_runs"),
            )
            .await?;
        Ok(summarize(&runs))
    }
}

#[derive(Default)]
struct WorkflowStats<'a> {
    runs: usize,
    successes: usize,
    durations: Vec<f64>,
    /// Conclusion of the first (most recent) run seen.
    last_status: Option<&'a str>,
}

fn run_minutes(run: &Value) -> Option<f64> {
    let started = stats::parse_time(run.get("run_started_at"))?;
    let updated = stats::parse_time(run.get("updated_at"))?;
    let minutes = (updated - started).num_seconds() as f64 / 60.0;
    (minutes > 0.0).then_some(minutes)
}

fn summarize(runs: &[Value]) -> AreaResult {
    let mut by_name: HashMap<&str, WorkflowStats<'_>> = HashMap::new();
    let mut total_successes = 0;
    let mut all_durations = Vec::new();

    for run in runs {
        let name = text(run, "/name").unwrap_or("Unknown");
        let conclusion = text(run, "/conclusion");
        let entry = by_name.entry(name).or_default();
        if entry.runs == 0 {
            entry.last_status = Some(conclusion.unwrap_or("unknown"));
        }
        entry.runs += 1;
        if conclusion == Some("success") {
            entry.successes += 1;
            total_successes += 1;
        }
        if let Some(minutes) = run_minutes(run) {
            entry.durations.push(minutes);
            all_durations.push(minutes);
        }
    }

    let mut breakdown: Vec<(&str, WorkflowStats<'_>)> = by_name.into_iter().collect();
    breakdown.sort_by(|a, b| b.1.runs.cmp(&a.1.runs).then_with(|| a.0.cmp(b.0)));

    let breakdown: Vec<Value> = breakdown
        .into_iter()
        .map(|(name, wf)| {
            json!({
                "name": name,
                "successRate": stats::rate(wf.successes, wf.runs),
                "p50": stats::round1(stats::percentile(&wf.durations, 50.0)),
                "p95": stats::round1(stats::percentile(&wf.durations, 95.0)),
                "runs": wf.runs,
                "lastStatus": wf.last_status.unwrap_or("unknown"),
            })
        })
        .collect();

    AreaResult::new()
        .metric("workflow_success_rate", stats::rate(total_successes, runs.len()))
        .metric(
            "workflow_p50_duration_min",
            stats::round1(stats::percentile(&all_durations, 50.0)),
        )
        .metric(
            "workflow_p95_duration_min",
            stats::round1(stats::percentile(&all_durations, 95.0)),
        )
        .detail("workflowBreakdown", breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;

    fn run(name: &str, conclusion: &str, minutes: i64) -> Value {
        let start: chrono::DateTime<chrono::Utc> = "2024-06-01T00:00:00Z".parse().unwrap();
        let end = start + chrono::Duration::minutes(minutes);
        json!({
            "name": name,
            "conclusion": conclusion,
            "run_started_at": start.to_rfc3339(),
            "updated_at": end.to_rfc3339(),
        })
    }

    #[test]
    fn no_runs_yields_zeroes() {
        let result = summarize(&[]);
        assert_eq!(result.metrics["workflow_success_rate"], MetricValue::Float(0.0));
        assert_eq!(result.metrics["workflow_p95_duration_min"], MetricValue::Float(0.0));
        assert_eq!(result.details["workflowBreakdown"], json!([]));
    }

    #[test]
    fn breakdown_sorted_by_runs_then_name() {
        let runs = vec![
            run("lint", "failure", 2),
            run("ci", "success", 10),
            run("ci", "success", 20),
            run("ci", "failure", 30),
            run("docs", "success", 5),
        ];
        let result = summarize(&runs);
        assert_eq!(result.metrics["workflow_success_rate"], MetricValue::Float(60.0));
        assert_eq!(result.metrics["workflow_p50_duration_min"], MetricValue::Float(10.0));
        assert_eq!(result.metrics["workflow_p95_duration_min"], MetricValue::Float(30.0));

        let breakdown = result.details["workflowBreakdown"].as_array().unwrap();
        let names: Vec<&str> = breakdown.iter().map(|w| w["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["ci", "docs", "lint"]);
        assert_eq!(breakdown[0]["successRate"], 66.7);
        assert_eq!(breakdown[0]["lastStatus"], "success");
        assert_eq!(breakdown[0]["p50"], 20.0);
        assert_eq!(breakdown[2]["lastStatus"], "failure");
    }

    #[test]
    fn non_positive_durations_ignored() {
        let runs = vec![run("ci", "success", 0), json!({"conclusion": null})];
        let result = summarize(&runs);
        assert_eq!(result.metrics["workflow_p50_duration_min"], MetricValue::Float(0.0));
        let breakdown = result.details["workflowBreakdown"].as_array().unwrap();
        let unnamed = breakdown.iter().find(|w| w["name"] == "Unknown").unwrap();
        assert_eq!(unnamed["lastStatus"], "unknown");
        assert_eq!(unnamed["runs"], 1);
    }
}
