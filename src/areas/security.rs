//! Security alert areas: Dependabot, code scanning and secret scanning.
//!
//! Each alert API answers 404 when the feature is off for the repository.
//! The client turns that into an empty listing, so a disabled feature shows
//! up as zero open alerts rather than a failed area.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{field, text, text_or};
use crate::client::PageOptions;
use crate::models::AreaResult;
use crate::stats;
use crate::traits::{AreaContext, AreaFetcher};

const RECENT_DAYS: i64 = 30;
const MAX_PR_DETAILS: usize = 10;
const DEPENDABOT_LOGINS: [&str; 2] = ["dependabot[bot]", "dependabot"];

// ═══════════════════════════════════════════════════════════════════════
// dependabot
// ═══════════════════════════════════════════════════════════════════════

pub struct Dependabot;

#[async_trait]
impl AreaFetcher for Dependabot {
    fn name(&self) -> &str {
        "dependabot"
    }

    fn description(&self) -> &str {
        "Open Dependabot alerts by severity, recent fixes and Dependabot PRs"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching dependabot alerts");
        let client = ctx.client();
        let open = client
            .paginate(
                &ctx.repo_path("/dependabot/alerts?state=open&sort=created&direction=desc"),
                &PageOptions::max_pages(3),
            )
            .await?;
        let fixed = client
            .paginate(
                &ctx.repo_path("/dependabot/alerts?state=fixed&sort=updated&direction=desc"),
                &PageOptions::max_pages(2),
            )
            .await?;

        info!("fetching dependabot pull requests");
        let prs = client
            .paginate(
                &ctx.repo_path("/pulls?state=all&sort=updated&direction=desc"),
                &PageOptions::max_pages(3),
            )
            .await?;

        Ok(summarize_dependabot(&open, &fixed, &prs, ctx.now()))
    }
}

fn summarize_dependabot(
    open: &[Value],
    fixed: &[Value],
    prs: &[Value],
    now: DateTime<Utc>,
) -> AreaResult {
    let since = now - Duration::days(RECENT_DAYS);
    let at_or_after = |item: &Value, key: &str| {
        stats::parse_time(item.get(key)).is_some_and(|t| t >= since)
    };

    let fixed_recently = fixed.iter().filter(|a| at_or_after(a, "fixed_at")).count();

    let mut severity_counts = Map::new();
    for level in ["critical", "high", "medium", "low"] {
        severity_counts.insert(level.to_string(), json!(0));
    }
    let mut ecosystem_counts = Map::new();

    let alerts: Vec<Value> = open
        .iter()
        .map(|alert| {
            let severity = text_or(alert, "/security_advisory/severity", "low");
            bump(&mut severity_counts, &severity);
            let ecosystem = text_or(alert, "/dependency/package/ecosystem", "unknown");
            bump(&mut ecosystem_counts, &ecosystem);

            let cve = text(alert, "/security_advisory/cve_id")
                .or_else(|| text(alert, "/security_advisory/ghsa_id"))
                .unwrap_or("-");
            json!({
                "number": field(alert, "/number"),
                "severity": severity,
                "package": text_or(alert, "/dependency/package/name", "unknown"),
                "ecosystem": ecosystem,
                "cve": cve,
                "cvss": field(alert, "/security_advisory/cvss/score"),
                "summary": text_or(alert, "/security_advisory/summary", "No description"),
                "createdAt": field(alert, "/created_at"),
                "url": field(alert, "/html_url"),
                "manifestPath": text_or(alert, "/dependency/manifest_path", ""),
            })
        })
        .collect();

    let bot_prs: Vec<&Value> = prs
        .iter()
        .filter(|pr| text(pr, "/user/login").is_some_and(|l| DEPENDABOT_LOGINS.contains(&l)))
        .collect();
    let prs_open = bot_prs.iter().filter(|pr| pr["state"] == "open").count();
    let prs_merged = bot_prs.iter().filter(|pr| at_or_after(pr, "merged_at")).count();

    let pr_details: Vec<Value> = bot_prs
        .iter()
        .take(MAX_PR_DETAILS)
        .map(|pr| {
            let state = match text(pr, "/merged_at") {
                Some(_) => json!("merged"),
                None => field(pr, "/state"),
            };
            json!({
                "number": field(pr, "/number"),
                "title": field(pr, "/title"),
                "state": state,
                "createdAt": field(pr, "/created_at"),
                "mergedAt": field(pr, "/merged_at"),
                "url": field(pr, "/html_url"),
            })
        })
        .collect();

    let count = |level: &str| severity_counts.get(level).and_then(Value::as_i64).unwrap_or(0);

    AreaResult::new()
        .metric("dependabot_critical", count("critical"))
        .metric("dependabot_high", count("high"))
        .metric("dependabot_medium", count("medium"))
        .metric("dependabot_low", count("low"))
        .metric("dependabot_total_open", open.len())
        .metric("dependabot_fixed_30d", fixed_recently)
        .metric("dependabot_prs_open", prs_open)
        .metric("dependabot_prs_merged_30d", prs_merged)
        .detail("dependabotAlerts", alerts)
        .detail("dependabotPrs", pr_details)
        .detail("severityCounts", severity_counts)
        .detail("ecosystemCounts", ecosystem_counts)
}

fn bump(counts: &mut Map<String, Value>, key: &str) {
    let current = counts.get(key).and_then(Value::as_i64).unwrap_or(0);
    counts.insert(key.to_string(), json!(current + 1));
}

// ═══════════════════════════════════════════════════════════════════════
// code-scanning
// ═══════════════════════════════════════════════════════════════════════

pub struct CodeScanning;

#[async_trait]
impl AreaFetcher for CodeScanning {
    fn name(&self) -> &str {
        "code-scanning"
    }

    fn description(&self) -> &str {
        "Open code scanning alerts grouped into errors, warnings and notes"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching code scanning alerts");
        let alerts = ctx
            .client()
            .paginate(
                &ctx.repo_path("/code-scanning/alerts?state=open&sort=created&direction=desc"),
                &PageOptions::max_pages(3),
            )
            .await?;
        Ok(summarize_code_scanning(&alerts))
    }
}

/// Collapse security severities and rule severities onto error/warning/note.
fn normalize_severity(raw: &str) -> &'static str {
    match raw {
        "critical" | "high" | "error" => "error",
        "medium" | "warning" => "warning",
        _ => "note",
    }
}

fn summarize_code_scanning(alerts: &[Value]) -> AreaResult {
    let (mut errors, mut warnings, mut notes) = (0usize, 0usize, 0usize);

    let details: Vec<Value> = alerts
        .iter()
        .map(|alert| {
            let raw = text(alert, "/rule/security_severity_level")
                .or_else(|| text(alert, "/rule/severity"))
                .unwrap_or("note");
            let severity = normalize_severity(raw);
            match severity {
                "error" => errors += 1,
                "warning" => warnings += 1,
                _ => notes += 1,
            }

            let location = match alert.pointer("/most_recent_instance/location") {
                Some(loc) if loc.is_object() => json!({
                    "path": field(loc, "/path"),
                    "startLine": field(loc, "/start_line"),
                    "endLine": field(loc, "/end_line"),
                }),
                _ => Value::Null,
            };
            let description = text(alert, "/rule/description")
                .filter(|d| !d.is_empty())
                .or_else(|| text(alert, "/message/text"))
                .unwrap_or("");

            json!({
                "number": field(alert, "/number"),
                "severity": severity,
                "rule": text_or(alert, "/rule/id", "unknown"),
                "tool": text_or(alert, "/tool/name", "unknown"),
                "description": description,
                "location": location,
                "createdAt": field(alert, "/created_at"),
                "url": field(alert, "/html_url"),
            })
        })
        .collect();

    AreaResult::new()
        .metric("code_scanning_errors", errors)
        .metric("code_scanning_warnings", warnings)
        .metric("code_scanning_notes", notes)
        .metric("code_scanning_total_open", alerts.len())
        .detail("codeScanningAlerts", details)
}

// ═══════════════════════════════════════════════════════════════════════
// secret-scanning
// ═══════════════════════════════════════════════════════════════════════

pub struct SecretScanning;

#[async_trait]
impl AreaFetcher for SecretScanning {
    fn name(&self) -> &str {
        "secret-scanning"
    }

    fn description(&self) -> &str {
        "Open and resolved secret scanning alerts"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching secret scanning alerts");
        let client = ctx.client();
        let open = client
            .paginate(
                &ctx.repo_path("/secret-scanning/alerts?state=open"),
                &PageOptions::max_pages(2),
            )
            .await?;
        let resolved = client
            .paginate(
                &ctx.repo_path("/secret-scanning/alerts?state=resolved"),
                &PageOptions::max_pages(2),
            )
            .await?;

        let details: Vec<Value> = open
            .iter()
            .map(|alert| {
                let secret_type = text(alert, "/secret_type_display_name")
                    .or_else(|| text(alert, "/secret_type"))
                    .unwrap_or("unknown");
                json!({
                    "number": field(alert, "/number"),
                    "secretType": secret_type,
                    "createdAt": field(alert, "/created_at"),
                    "url": field(alert, "/html_url"),
                })
            })
            .collect();

        Ok(AreaResult::new()
            .metric("secret_scanning_open", open.len())
            .metric("secret_scanning_resolved", resolved.len())
            .detail("secretScanningAlerts", details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;

    fn now() -> DateTime<Utc> {
        "2024-06-30T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn dependabot_counts() {
        let open = vec![
            json!({"number": 1, "security_advisory": {"severity": "critical", "cve_id": "CVE-1"},
                   "dependency": {"package": {"ecosystem": "npm", "name": "left-pad"}}}),
            json!({"number": 2, "security_advisory": {"severity": "high", "ghsa_id": "GHSA-2"},
                   "dependency": {"package": {"ecosystem": "npm"}}}),
            json!({"number": 3, "dependency": {"package": {"ecosystem": "cargo"}}}),
        ];
        let fixed = vec![
            json!({"fixed_at": "2024-06-20T00:00:00Z"}),
            json!({"fixed_at": "2024-01-01T00:00:00Z"}),
            json!({"fixed_at": null}),
        ];
        let prs = vec![
            json!({"user": {"login": "dependabot[bot]"}, "state": "open", "number": 10}),
            json!({"user": {"login": "dependabot[bot]"}, "state": "closed",
                   "merged_at": "2024-06-25T00:00:00Z", "number": 9}),
            json!({"user": {"login": "someone"}, "state": "open"}),
        ];

        let result = summarize_dependabot(&open, &fixed, &prs, now());
        let m = &result.metrics;
        assert_eq!(m["dependabot_critical"], MetricValue::Int(1));
        assert_eq!(m["dependabot_high"], MetricValue::Int(1));
        assert_eq!(m["dependabot_medium"], MetricValue::Int(0));
        assert_eq!(m["dependabot_low"], MetricValue::Int(1));
        assert_eq!(m["dependabot_total_open"], MetricValue::Int(3));
        assert_eq!(m["dependabot_fixed_30d"], MetricValue::Int(1));
        assert_eq!(m["dependabot_prs_open"], MetricValue::Int(1));
        assert_eq!(m["dependabot_prs_merged_30d"], MetricValue::Int(1));

        assert_eq!(result.details["ecosystemCounts"], json!({"npm": 2, "cargo": 1}));
        let alerts = result.details["dependabotAlerts"].as_array().unwrap();
        assert_eq!(alerts[0]["cve"], "CVE-1");
        assert_eq!(alerts[1]["cve"], "GHSA-2");
        assert_eq!(alerts[2]["cve"], "-");
        assert_eq!(alerts[2]["package"], "unknown");
        let prs = result.details["dependabotPrs"].as_array().unwrap();
        assert_eq!(prs[1]["state"], "merged");
    }

    #[test]
    fn code_scanning_severity_mapping() {
        assert_eq!(normalize_severity("critical"), "error");
        assert_eq!(normalize_severity("medium"), "warning");
        assert_eq!(normalize_severity("low"), "note");

        let alerts = vec![
            json!({"rule": {"security_severity_level": "high", "severity": "warning", "id": "sql"},
                   "most_recent_instance": {"location": {"path": "a.rs", "start_line": 3, "end_line": 4}}}),
            json!({"rule": {"severity": "warning"}, "message": {"text": "unused"}}),
            json!({}),
        ];
        let result = summarize_code_scanning(&alerts);
        assert_eq!(result.metrics["code_scanning_errors"], MetricValue::Int(1));
        assert_eq!(result.metrics["code_scanning_warnings"], MetricValue::Int(1));
        assert_eq!(result.metrics["code_scanning_notes"], MetricValue::Int(1));
        assert_eq!(result.metrics["code_scanning_total_open"], MetricValue::Int(3));

        let details = result.details["codeScanningAlerts"].as_array().unwrap();
        assert_eq!(details[0]["location"]["startLine"], 3);
        assert_eq!(details[1]["description"], "unused");
        assert_eq!(details[2]["location"], Value::Null);
        assert_eq!(details[2]["rule"], "unknown");
    }
}
