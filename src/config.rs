//! Configuration loading.
//!
//! Settings are layered, last wins:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file (`--config`, default `./config/pulse.toml`),
//! 3. environment variables,
//! 4. command-line flags (applied by the CLI after [`load_config`]).
//!
//! Environment variable names depend on the selected [`Module`]: the
//! `github-statistics` module reads `GITHUB_STATS_*`, the `dependabot`
//! module reads `DEPENDABOT_*`. `GITHUB_TOKEN`, `GITHUB_API_URL` and
//! `DASHBUILD_DIR` are shared.
//!
//! # Example
//!
//! ```toml
//! [api]
//! timeout_secs = 30
//!
//! [collect]
//! module = "dependabot"
//! repository = "acme/widgets"
//! retention_days = 180
//! cache_file = ".cache/dependabot.json"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Resolved token. Never read from the file.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            token: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectConfig {
    #[serde(default)]
    pub module: Module,
    #[serde(default)]
    pub repository: Option<String>,
    /// Requested areas. `None` means the module's default set.
    #[serde(default)]
    pub areas: Option<Vec<String>>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Cache file path. Empty disables the cache.
    #[serde(default)]
    pub cache_file: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_review_prs")]
    pub max_review_prs: usize,
    #[serde(default = "default_max_branch_checks")]
    pub max_branch_checks: usize,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            module: Module::default(),
            repository: None,
            areas: None,
            lookback_days: default_lookback_days(),
            retention_days: default_retention_days(),
            cache_file: String::new(),
            concurrency: default_concurrency(),
            max_review_prs: default_max_review_prs(),
            max_branch_checks: default_max_branch_checks(),
        }
    }
}

fn default_lookback_days() -> u32 {
    90
}
fn default_retention_days() -> u32 {
    90
}
fn default_concurrency() -> usize {
    4
}
fn default_max_review_prs() -> usize {
    30
}
fn default_max_branch_checks() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    /// Explicit output path. When unset, the file goes to
    /// `$DASHBUILD_DIR/src/data/<slug>.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(skip)]
    pub dashbuild_dir: Option<PathBuf>,
}

/// Which dashboard module is being collected for.
///
/// The module decides the default area list, the environment prefix, the
/// output slug, and whether repository visibility is recorded.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Module {
    #[default]
    GithubStatistics,
    Dependabot,
}

impl Module {
    pub fn slug(&self) -> &'static str {
        match self {
            Module::GithubStatistics => "github-statistics",
            Module::Dependabot => "dependabot",
        }
    }

    pub fn env_prefix(&self) -> &'static str {
        match self {
            Module::GithubStatistics => "GITHUB_STATS_",
            Module::Dependabot => "DEPENDABOT_",
        }
    }

    pub fn default_areas(&self) -> &'static [&'static str] {
        match self {
            Module::GithubStatistics => &[
                "prs",
                "issues",
                "workflows",
                "releases",
                "commits",
                "contributors",
                "branches",
                "languages",
                "community",
            ],
            Module::Dependabot => &["dependabot", "code-scanning", "secret-scanning"],
        }
    }

    pub fn user_agent(&self) -> String {
        format!("repo-pulse-{}", self.slug())
    }

    /// Whether the output records the repository's public/private status.
    pub fn records_visibility(&self) -> bool {
        matches!(self, Module::GithubStatistics)
    }
}

impl FromStr for Module {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "github-statistics" => Ok(Module::GithubStatistics),
            "dependabot" => Ok(Module::Dependabot),
            other => Err(ConfigError::UnknownModule(other.to_string())),
        }
    }
}

impl Config {
    /// The requested areas, falling back to the module defaults.
    pub fn areas(&self) -> Vec<String> {
        match &self.collect.areas {
            Some(areas) => areas.clone(),
            None => self
                .collect
                .module
                .default_areas()
                .iter()
                .map(|a| a.to_string())
                .collect(),
        }
    }

    /// Cache file path, or `None` when the cache is disabled.
    pub fn cache_path(&self) -> Option<PathBuf> {
        let trimmed = self.collect.cache_file.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    /// Resolve where the output document is written.
    pub fn output_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.output.path {
            return Ok(path.clone());
        }
        let dir = self
            .output
            .dashbuild_dir
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("DASHBUILD_DIR".to_string()))?;
        Ok(dir
            .join("src")
            .join("data")
            .join(format!("{}.json", self.collect.module.slug())))
    }

    /// Split `owner/repo` into its parts.
    pub fn owner_repo(&self) -> Result<(String, String), ConfigError> {
        let key = format!("{}REPOSITORY", self.collect.module.env_prefix());
        let repo = self
            .collect
            .repository
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ConfigError::Missing(key.clone()))?;
        match repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok((owner.to_string(), name.to_string()))
            }
            _ => Err(ConfigError::Invalid {
                key,
                value: repo.to_string(),
                expected: "in owner/repo form",
            }),
        }
    }

    /// Everything a `collect` run needs before touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(ConfigError::Missing(self.api.token_env.clone()));
        }
        self.owner_repo()?;
        self.output_path()?;
        if self.collect.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "collect.concurrency".to_string(),
                value: "0".to_string(),
                expected: "at least 1",
            });
        }
        if self.api.page_size == 0 || self.api.page_size > 100 {
            return Err(ConfigError::Invalid {
                key: "api.page_size".to_string(),
                value: self.api.page_size.to_string(),
                expected: "between 1 and 100",
            });
        }
        Ok(())
    }

    /// Apply environment overrides from an arbitrary lookup function.
    ///
    /// Kept separate from [`std::env`] so tests can supply a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get(&self.api.token_env) {
            self.api.token = Some(token);
        }
        if let Some(url) = get("GITHUB_API_URL") {
            self.api.base_url = url;
        }
        if let Some(dir) = get("DASHBUILD_DIR") {
            self.output.dashbuild_dir = Some(PathBuf::from(dir));
        }

        let prefix = self.collect.module.env_prefix();
        let key = |suffix: &str| format!("{}{}", prefix, suffix);

        if let Some(repo) = get(&key("REPOSITORY")) {
            self.collect.repository = Some(repo);
        }
        if let Some(areas) = get(&key("AREAS")) {
            self.collect.areas = Some(parse_area_list(&areas));
        }
        if let Some(cache) = lookup(&key("CACHE_FILE")) {
            self.collect.cache_file = cache;
        }
        if let Some(v) = get(&key("LOOKBACK_DAYS")) {
            self.collect.lookback_days = parse_number(&key("LOOKBACK_DAYS"), &v)?;
        }
        if let Some(v) = get(&key("RETENTION_DAYS")) {
            self.collect.retention_days = parse_number(&key("RETENTION_DAYS"), &v)?;
        }
        if let Some(v) = get(&key("MAX_REVIEW_PRS")) {
            self.collect.max_review_prs = parse_number(&key("MAX_REVIEW_PRS"), &v)?;
        }
        if let Some(v) = get(&key("MAX_BRANCH_CHECKS")) {
            self.collect.max_branch_checks = parse_number(&key("MAX_BRANCH_CHECKS"), &v)?;
        }
        if let Some(v) = get(&key("CONCURRENCY")) {
            self.collect.concurrency = parse_number(&key("CONCURRENCY"), &v)?;
        }
        Ok(())
    }
}

/// Split a comma-separated area list, trimming blanks.
pub fn parse_area_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}

/// Load configuration from an optional TOML file and the process environment.
///
/// A missing file is not an error; every setting has a default or can come
/// from the environment. `module` overrides the module named in the file,
/// since it decides which environment prefix is read.
pub fn load_config(path: &Path, module: Option<Module>) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    if let Some(module) = module {
        config.collect.module = module;
    }

    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}
