//! Repository-level areas: releases, commit activity, contributors,
//! branches, languages, community health files, traffic, stars and forks.
//!
//! Most of these are one or two calls each. `branches` is the exception: the
//! list endpoint has no commit dates, so each non-default branch costs one
//! more request, capped by `max_branch_checks`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{field, present, text, text_or};
use crate::client::{PageOptions, GITHUB_STAR_JSON};
use crate::models::AreaResult;
use crate::stats;
use crate::traits::{AreaContext, AreaFetcher};

const MAX_RELEASE_DETAILS: usize = 10;
const COMMIT_ACTIVITY_WEEKS: usize = 12;
const MAX_TOP_CONTRIBUTORS: usize = 10;
const ACTIVE_CONTRIBUTOR_DAYS: i64 = 30;

// ═══════════════════════════════════════════════════════════════════════
// releases
// ═══════════════════════════════════════════════════════════════════════

pub struct Releases;

#[async_trait]
impl AreaFetcher for Releases {
    fn name(&self) -> &str {
        "releases"
    }

    fn description(&self) -> &str {
        "Release count and days since the last stable release"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching releases");
        let releases = ctx
            .client()
            .paginate(&ctx.repo_path("/releases"), &PageOptions::max_pages(3))
            .await?;
        Ok(summarize_releases(&releases, ctx.now()))
    }
}

fn summarize_releases(releases: &[Value], now: DateTime<Utc>) -> AreaResult {
    let days_since = releases
        .iter()
        .find(|r| r["draft"] != true && r["prerelease"] != true)
        .and_then(|r| stats::parse_time(r.get("published_at")))
        .map(|published| stats::days_between(published, now).floor() as i64)
        .unwrap_or(-1);

    let details: Vec<Value> = releases
        .iter()
        .take(MAX_RELEASE_DETAILS)
        .map(|r| {
            let tag = field(r, "/tag_name");
            let name = match text(r, "/name") {
                Some(name) if !name.is_empty() => Value::from(name),
                _ => tag.clone(),
            };
            let date = match field(r, "/published_at") {
                Value::Null => field(r, "/created_at"),
                published => published,
            };
            json!({
                "tag": tag,
                "name": name,
                "date": date,
                "prerelease": r["prerelease"] == true,
                "url": field(r, "/html_url"),
            })
        })
        .collect();

    AreaResult::new()
        .metric("releases_total", releases.len())
        .metric("days_since_last_release", days_since)
        .detail("releases", details)
}

// ═══════════════════════════════════════════════════════════════════════
// commits
// ═══════════════════════════════════════════════════════════════════════

pub struct Commits;

#[async_trait]
impl AreaFetcher for Commits {
    fn name(&self) -> &str {
        "commits"
    }

    fn description(&self) -> &str {
        "Weekly commit activity"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching commit activity");
        let data = ctx
            .client()
            .get_json(&ctx.repo_path("/stats/commit_activity"))
            .await?;
        Ok(summarize_commit_activity(data.as_ref()))
    }
}

fn summarize_commit_activity(data: Option<&Value>) -> AreaResult {
    let Some(weeks) = data.and_then(Value::as_array) else {
        return AreaResult::new()
            .metric("commits_last_week", 0i64)
            .detail("commitActivity", Value::Array(vec![]));
    };

    let active: Vec<Value> = weeks
        .iter()
        .filter(|w| w["total"].as_i64().unwrap_or(0) > 0)
        .filter_map(|w| {
            let start = DateTime::from_timestamp(w["week"].as_i64()?, 0)?;
            Some(json!({
                "week": start.format("%Y-%m-%d").to_string(),
                "total": w["total"],
            }))
        })
        .collect();
    let skip = active.len().saturating_sub(COMMIT_ACTIVITY_WEEKS);
    let recent: Vec<Value> = active.into_iter().skip(skip).collect();

    let last_week = weeks
        .last()
        .and_then(|w| w["total"].as_i64())
        .unwrap_or(0);

    AreaResult::new()
        .metric("commits_last_week", last_week)
        .detail("commitActivity", recent)
}

// ═══════════════════════════════════════════════════════════════════════
// contributors
// ═══════════════════════════════════════════════════════════════════════

pub struct Contributors;

#[async_trait]
impl AreaFetcher for Contributors {
    fn name(&self) -> &str {
        "contributors"
    }

    fn description(&self) -> &str {
        "Active contributors in the last 30 days and top committers"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching contributors");
        let data = ctx
            .client()
            .get_json(&ctx.repo_path("/stats/contributors"))
            .await?;
        Ok(summarize_contributors(data.as_ref(), ctx.now()))
    }
}

struct ContributorRow {
    login: String,
    commits: i64,
    additions: i64,
    deletions: i64,
}

fn summarize_contributors(data: Option<&Value>, now: DateTime<Utc>) -> AreaResult {
    let Some(entries) = data.and_then(Value::as_array) else {
        return AreaResult::new()
            .metric("contributors_active_30d", 0i64)
            .detail("topContributors", Value::Array(vec![]));
    };

    let active_since = now - Duration::days(ACTIVE_CONTRIBUTOR_DAYS);
    let mut active = 0usize;
    let mut rows: Vec<ContributorRow> = entries
        .iter()
        .map(|c| {
            let mut row = ContributorRow {
                login: text_or(c, "/author/login", "unknown"),
                commits: c["total"].as_i64().unwrap_or(0),
                additions: 0,
                deletions: 0,
            };
            let mut recent = 0;
            for week in c["weeks"].as_array().into_iter().flatten() {
                row.additions += week["a"].as_i64().unwrap_or(0);
                row.deletions += week["d"].as_i64().unwrap_or(0);
                let starts = week["w"].as_i64().and_then(|w| DateTime::from_timestamp(w, 0));
                if starts.is_some_and(|s| s >= active_since) {
                    recent += week["c"].as_i64().unwrap_or(0);
                }
            }
            if recent > 0 {
                active += 1;
            }
            row
        })
        .collect();

    rows.sort_by(|a, b| b.commits.cmp(&a.commits));
    let top: Vec<Value> = rows
        .into_iter()
        .take(MAX_TOP_CONTRIBUTORS)
        .map(|r| {
            json!({
                "login": r.login,
                "commits": r.commits,
                "additions": r.additions,
                "deletions": r.deletions,
            })
        })
        .collect();

    AreaResult::new()
        .metric("contributors_active_30d", active)
        .detail("topContributors", top)
}

// ═══════════════════════════════════════════════════════════════════════
// branches
// ═══════════════════════════════════════════════════════════════════════

pub struct Branches;

#[async_trait]
impl AreaFetcher for Branches {
    fn name(&self) -> &str {
        "branches"
    }

    fn description(&self) -> &str {
        "Branch count and branches with no commits in 90 days"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching branches");
        let branches = ctx
            .client()
            .paginate(&ctx.repo_path("/branches"), &PageOptions::max_pages(3))
            .await?;

        let default_branch = ctx
            .repository()
            .await?
            .and_then(|r| text(r, "/default_branch"))
            .unwrap_or("main")
            .to_string();

        let stale_cutoff = ctx.now() - Duration::days(ctx.settings().stale_branch_days);
        let mut stale = Vec::new();
        let candidates = branches
            .iter()
            .filter(|b| text(b, "/name") != Some(default_branch.as_str()))
            .take(ctx.settings().max_branch_checks);

        for branch in candidates {
            let Some(sha) = text(branch, "/commit/sha") else {
                continue;
            };
            let commit = ctx
                .client()
                .get_json(&ctx.repo_path(&format!("/commits/{}", sha)))
                .await?;
            let committed = commit
                .as_ref()
                .and_then(|c| stats::parse_time(c.pointer("/commit/committer/date")));
            if committed.is_some_and(|d| d < stale_cutoff) {
                stale.push(field(branch, "/name"));
            }
        }

        Ok(AreaResult::new()
            .metric("branches_total", branches.len())
            .metric("branches_stale", stale.len())
            .detail("staleBranches", stale))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// languages
// ═══════════════════════════════════════════════════════════════════════

pub struct Languages;

#[async_trait]
impl AreaFetcher for Languages {
    fn name(&self) -> &str {
        "languages"
    }

    fn description(&self) -> &str {
        "Bytes of code per language"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching languages");
        let data = ctx.client().get_json(&ctx.repo_path("/languages")).await?;
        let languages = data.unwrap_or_else(|| Value::Object(Map::new()));
        Ok(AreaResult::new().detail("languages", languages))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// community
// ═══════════════════════════════════════════════════════════════════════

pub struct Community;

#[async_trait]
impl AreaFetcher for Community {
    fn name(&self) -> &str {
        "community"
    }

    fn description(&self) -> &str {
        "Presence of README, license, contributing guide and other health files"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching community profile");
        let profile = ctx
            .client()
            .get_json(&ctx.repo_path("/community/profile"))
            .await?;
        if let Some(profile) = profile {
            return Ok(AreaResult::new().detail("communityProfile", profile_flags(&profile)));
        }

        // Private repositories have no community profile; inspect the root tree.
        let tree = ctx
            .client()
            .get_json(&ctx.repo_path("/git/trees/HEAD?recursive=false"))
            .await?;
        let names: Vec<String> = tree
            .as_ref()
            .and_then(|t| t["tree"].as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| text(e, "/path"))
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();
        Ok(AreaResult::new().detail("communityProfile", tree_flags(&names)))
    }
}

fn profile_flags(profile: &Value) -> Value {
    let has = |file: &str| present(profile, &format!("/files/{}", file));
    json!({
        "hasReadme": has("readme"),
        "hasLicense": has("license"),
        "hasContributing": has("contributing"),
        "hasCodeOfConduct": has("code_of_conduct"),
        "hasCodeowners": has("codeowners"),
        "hasSecurity": has("security"),
        "hasIssueTemplate": has("issue_template"),
        "hasPrTemplate": has("pull_request_template"),
    })
}

fn tree_flags(names: &[String]) -> Value {
    let has = |pattern: &str| names.iter().any(|n| n.contains(pattern));
    json!({
        "hasReadme": has("readme"),
        "hasLicense": has("license"),
        "hasContributing": has("contributing"),
        "hasCodeOfConduct": has("code_of_conduct"),
        "hasCodeowners": has("codeowners"),
        "hasSecurity": has("security"),
        "hasIssueTemplate": has(".github/issue_template"),
        "hasPrTemplate": has(".github/pull_request_template"),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// traffic
// ═══════════════════════════════════════════════════════════════════════

pub struct Traffic;

#[async_trait]
impl AreaFetcher for Traffic {
    fn name(&self) -> &str {
        "traffic"
    }

    fn description(&self) -> &str {
        "Views, clones, referrers and popular paths (needs push access)"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching traffic");
        let client = ctx.client();
        let (views_path, clones_path, referrers_path, paths_path) = (
            ctx.repo_path("/traffic/views"),
            ctx.repo_path("/traffic/clones"),
            ctx.repo_path("/traffic/popular/referrers"),
            ctx.repo_path("/traffic/popular/paths"),
        );
        let (views, clones, referrers, paths) = tokio::try_join!(
            client.get_json(&views_path),
            client.get_json(&clones_path),
            client.get_json(&referrers_path),
            client.get_json(&paths_path),
        )?;

        let Some(views) = views else {
            warn!(area = "traffic", "traffic data unavailable (requires push access)");
            return Ok(AreaResult::new());
        };

        let list = |v: Option<Value>| match v {
            Some(v @ Value::Array(_)) => v,
            _ => Value::Array(vec![]),
        };
        let traffic = json!({
            "views": list(views.get("views").cloned()),
            "clones": list(clones.and_then(|c| c.get("clones").cloned())),
            "referrers": list(referrers),
            "paths": list(paths),
        });

        Ok(AreaResult::new()
            .metric("traffic_views_14d", views["count"].as_i64().unwrap_or(0))
            .metric("traffic_uniques_14d", views["uniques"].as_i64().unwrap_or(0))
            .detail("traffic", traffic))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// stars
// ═══════════════════════════════════════════════════════════════════════

pub struct Stars;

#[async_trait]
impl AreaFetcher for Stars {
    fn name(&self) -> &str {
        "stars"
    }

    fn description(&self) -> &str {
        "Star count and cumulative star history"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        info!("fetching star history");
        let stargazers = ctx
            .client()
            .paginate(
                &ctx.repo_path("/stargazers"),
                &PageOptions::max_pages(2).accept(GITHUB_STAR_JSON),
            )
            .await?;
        let total = ctx
            .repository()
            .await?
            .and_then(|r| r["stargazers_count"].as_i64())
            .unwrap_or(0);

        Ok(AreaResult::new()
            .metric("stars_total", total)
            .detail("starHistory", star_history(&stargazers)))
    }
}

/// Cumulative star count at the end of each day that gained stars.
fn star_history(stargazers: &[Value]) -> Value {
    let mut per_day: BTreeMap<String, u64> = BTreeMap::new();
    for star in stargazers {
        if let Some(at) = stats::parse_time(star.get("starred_at")) {
            *per_day.entry(at.format("%Y-%m-%d").to_string()).or_default() += 1;
        }
    }
    let mut running = 0;
    let history: Vec<Value> = per_day
        .into_iter()
        .map(|(date, count)| {
            running += count;
            json!({"date": date, "count": running})
        })
        .collect();
    Value::Array(history)
}

// ═══════════════════════════════════════════════════════════════════════
// forks
// ═══════════════════════════════════════════════════════════════════════

pub struct Forks;

#[async_trait]
impl AreaFetcher for Forks {
    fn name(&self) -> &str {
        "forks"
    }

    fn description(&self) -> &str {
        "Fork count"
    }

    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
        let forks = ctx
            .repository()
            .await?
            .and_then(|r| r["forks_count"].as_i64())
            .unwrap_or(0);
        Ok(AreaResult::new().metric("forks_total", forks))
    }
}
