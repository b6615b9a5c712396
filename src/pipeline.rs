//! End-to-end collection run.
//!
//! `validate → collect areas → visibility → merge history → layer config
//! extras and details → write output and cache`. Nothing touches the network
//! before the configuration is known to be complete, and nothing is written
//! when the run aborts on the rate limit.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::client::{ApiClient, ClientSettings};
use crate::collect::collect;
use crate::config::Config;
use crate::history::{merge_history, write_document, MergeRequest};
use crate::traits::{AreaRegistry, AreaSettings, RunContext};

/// What a finished run did.
#[derive(Debug)]
pub struct RunSummary {
    pub repository: String,
    pub areas_succeeded: Vec<String>,
    pub areas_failed: Vec<String>,
    pub request_count: u64,
    pub history_entries: usize,
    pub output: PathBuf,
    pub cache: Option<PathBuf>,
}

/// Run a full collection with the built-in areas.
pub async fn run_collect(config: &Config) -> Result<RunSummary> {
    run_collect_with(config, &AreaRegistry::builtin()).await
}

/// Run a full collection with a caller-supplied registry.
pub async fn run_collect_with(config: &Config, registry: &AreaRegistry) -> Result<RunSummary> {
    config.validate()?;
    let (owner, repo) = config.owner_repo()?;
    let output = config.output_path()?;
    let cache = config.cache_path();
    let areas = config.areas();
    let module = config.collect.module;

    info!(
        repository = %format!("{}/{}", owner, repo),
        module = module.slug(),
        areas = %areas.join(","),
        lookback_days = config.collect.lookback_days,
        "starting collection"
    );

    let client = ApiClient::new(&ClientSettings::from_config(config))?;
    let run = Arc::new(RunContext::new(
        client.clone(),
        &owner,
        &repo,
        AreaSettings::from_config(config),
        Utc::now(),
    ));

    let collection = collect(&areas, registry, Arc::clone(&run), config.collect.concurrency).await?;

    let visibility = if module.records_visibility() {
        let private = run
            .repository_via(&client)
            .await?
            .map_or(true, |r| r["private"].as_bool().unwrap_or(true));
        Some(if private { "private" } else { "public" })
    } else {
        None
    };

    let request_count = collection.request_count + client.request_count();
    info!(requests = request_count, "total API requests");

    let mut doc = merge_history(&MergeRequest {
        todays_metrics: &collection.metrics,
        cache_file: cache.as_deref(),
        areas: &areas,
        output_file: &output,
        retention_days: config.collect.retention_days,
    })?;

    let extra = &mut doc.config.extra;
    extra.insert("repository".into(), json!(run.full_name()));
    extra.insert("lookbackDays".into(), json!(config.collect.lookback_days));
    if let Some(visibility) = visibility {
        extra.insert("visibility".into(), json!(visibility));
    }
    doc.details = collection.details;

    write_document(&doc, &output, cache.as_deref())?;

    Ok(RunSummary {
        repository: run.full_name(),
        areas_succeeded: collection.areas_succeeded,
        areas_failed: collection.areas_failed,
        request_count,
        history_entries: doc.history.len(),
        output,
        cache,
    })
}

impl RunSummary {
    /// Human-readable report for stdout.
    pub fn print(&self) {
        println!("collect {}", self.repository);
        println!("  areas ok: {}", join_or_dash(&self.areas_succeeded));
        if !self.areas_failed.is_empty() {
            println!("  areas failed: {}", self.areas_failed.join(", "));
        }
        println!("  API requests: {}", self.request_count);
        println!("  history entries: {}", self.history_entries);
        println!("  output: {}", self.output.display());
        if let Some(cache) = &self.cache {
            println!("  cache: {}", cache.display());
        }
        println!("ok");
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
