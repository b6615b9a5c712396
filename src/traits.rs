//! Extension traits for metric areas.
//!
//! An *area* is one independently pluggable subject of metrics: pull
//! requests, workflow runs, Dependabot alerts, and so on. Every area
//! implements [`AreaFetcher`] and is looked up by name in an
//! [`AreaRegistry`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               AreaRegistry               │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐  │
//! │  │ activity │ │ security │ │  Custom  │  │
//! │  │ prs/ci/… │ │ alerts   │ │  (Rust)  │  │
//! │  └──────────┘ └──────────┘ └──────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!          collect() → merged snapshot → merge_history()
//! ```
//!
//! # Usage
//!
//! ```rust
//! use repo_pulse::traits::AreaRegistry;
//!
//! let areas = AreaRegistry::builtin();
//! assert!(areas.find("prs").is_some());
//! // areas.register(Arc::new(MyArea));
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::client::ApiClient;
use crate::config::Config;
use crate::error::FetchError;
use crate::models::AreaResult;

// ═══════════════════════════════════════════════════════════════════════
// AreaFetcher Trait
// ═══════════════════════════════════════════════════════════════════════

/// A metrics area that turns API data into an [`AreaResult`].
///
/// Areas are independent of each other. Returning an error is fine: the
/// collector logs it, records the area as failed, and carries on with the
/// rest. The exception is [`FetchError::RateLimitExceeded`], which aborts the
/// whole run.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use repo_pulse::models::AreaResult;
/// use repo_pulse::traits::{AreaContext, AreaFetcher};
///
/// pub struct Watchers;
///
/// #[async_trait]
/// impl AreaFetcher for Watchers {
///     fn name(&self) -> &str { "watchers" }
///     fn description(&self) -> &str { "Subscriber count" }
///
///     async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult> {
///         let count = ctx
///             .repository()
///             .await?
///             .and_then(|r| r["subscribers_count"].as_i64())
///             .unwrap_or(0);
///         Ok(AreaResult::new().metric("watchers_total", count))
///     }
/// }
/// ```
#[async_trait]
pub trait AreaFetcher: Send + Sync {
    /// Area name as used in the configured area list (e.g. `"prs"`).
    fn name(&self) -> &str;

    /// One-line description, shown by `pulse areas`.
    fn description(&self) -> &str;

    /// Collect this area's metrics and details.
    async fn fetch(&self, ctx: &AreaContext) -> Result<AreaResult>;
}

// ═══════════════════════════════════════════════════════════════════════
// Contexts
// ═══════════════════════════════════════════════════════════════════════

/// Per-area tunables.
#[derive(Debug, Clone)]
pub struct AreaSettings {
    pub lookback_days: u32,
    /// How many merged PRs get a follow-up reviews request.
    pub max_review_prs: usize,
    /// How many non-default branches get a follow-up commit request.
    pub max_branch_checks: usize,
    /// A branch whose last commit is older than this is stale.
    pub stale_branch_days: i64,
}

impl Default for AreaSettings {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            max_review_prs: 30,
            max_branch_checks: 20,
            stale_branch_days: 90,
        }
    }
}

impl AreaSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lookback_days: config.collect.lookback_days,
            max_review_prs: config.collect.max_review_prs,
            max_branch_checks: config.collect.max_branch_checks,
            ..Self::default()
        }
    }
}

/// State shared by every area in one run.
pub struct RunContext {
    client: ApiClient,
    pub owner: String,
    pub repo: String,
    /// Reference instant for ages and windows.
    pub now: DateTime<Utc>,
    /// Items last touched before this instant are outside the window.
    pub lookback: DateTime<Utc>,
    pub settings: AreaSettings,
    repository: OnceCell<Option<Value>>,
}

impl RunContext {
    pub fn new(
        client: ApiClient,
        owner: &str,
        repo: &str,
        settings: AreaSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let lookback = now - Duration::days(i64::from(settings.lookback_days));
        Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
            now,
            lookback,
            settings,
            repository: OnceCell::new(),
        }
    }

    /// The run's root client. Its counter only sees calls made outside areas.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// `owner/repo`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Repository metadata (`GET /repos/{owner}/{repo}`), fetched through
    /// `client` on first use and shared afterwards, including a `None` from a
    /// failed request.
    pub async fn repository_via(&self, client: &ApiClient) -> Result<Option<&Value>, FetchError> {
        let path = format!("/repos/{}/{}", self.owner, self.repo);
        self.repository
            .get_or_try_init(|| async { client.get_json(&path).await })
            .await
            .map(Option::as_ref)
    }

    /// Context for one area, with its own request counter.
    pub fn for_area(self: &Arc<Self>) -> AreaContext {
        AreaContext {
            run: Arc::clone(self),
            client: self.client.scoped(),
        }
    }
}

/// What an [`AreaFetcher`] sees while it runs.
pub struct AreaContext {
    run: Arc<RunContext>,
    client: ApiClient,
}

impl AreaContext {
    /// Client whose requests are attributed to this area.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn settings(&self) -> &AreaSettings {
        &self.run.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.run.now
    }

    pub fn lookback(&self) -> DateTime<Utc> {
        self.run.lookback
    }

    /// API path under the target repository, e.g. `repo_path("/pulls")`.
    pub fn repo_path(&self, suffix: &str) -> String {
        format!("/repos/{}/{}{}", self.run.owner, self.run.repo, suffix)
    }

    /// Repository metadata. Several areas read it; only the first caller
    /// pays for the request.
    pub async fn repository(&self) -> Result<Option<&Value>, FetchError> {
        self.run.repository_via(&self.client).await
    }

    pub fn request_count(&self) -> u64 {
        self.client.request_count()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry mapping area names to fetchers.
///
/// Use [`AreaRegistry::builtin`] for every shipped area, then optionally
/// [`register`](AreaRegistry::register) custom ones. Registering a name that
/// already exists replaces the earlier fetcher.
pub struct AreaRegistry {
    areas: Vec<Arc<dyn AreaFetcher>>,
}

impl AreaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { areas: Vec::new() }
    }

    /// Create a registry pre-loaded with all built-in areas.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for area in crate::areas::builtin() {
            registry.register(area);
        }
        registry
    }

    /// Register an area.
    pub fn register(&mut self, area: Arc<dyn AreaFetcher>) {
        self.areas.retain(|a| a.name() != area.name());
        self.areas.push(area);
    }

    /// Get all registered areas.
    pub fn areas(&self) -> &[Arc<dyn AreaFetcher>] {
        &self.areas
    }

    /// Find an area by name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn AreaFetcher>> {
        self.areas.iter().find(|a| a.name() == name).cloned()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Return the count of registered areas.
    pub fn len(&self) -> usize {
        self.areas.len()
    }
}

impl Default for AreaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl AreaFetcher for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            self.1
        }
        async fn fetch(&self, _ctx: &AreaContext) -> Result<AreaResult> {
            Ok(AreaResult::new())
        }
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = AreaRegistry::new();
        registry.register(Arc::new(Named("prs", "first")));
        registry.register(Arc::new(Named("prs", "second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find("prs").unwrap().description(), "second");
        assert!(registry.find("nope").is_none());
    }

    #[test]
    fn builtin_contains_all_module_defaults() {
        let registry = AreaRegistry::builtin();
        for module in [
            crate::config::Module::GithubStatistics,
            crate::config::Module::Dependabot,
        ] {
            for area in module.default_areas() {
                assert!(registry.find(area).is_some(), "missing area {}", area);
            }
        }
        for extra in ["traffic", "stars", "forks"] {
            assert!(registry.find(extra).is_some());
        }
    }
}
