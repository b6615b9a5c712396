//! # repo-pulse CLI (`pulse`)
//!
//! Collects GitHub repository metrics into a daily history file for
//! dashboard pages.
//!
//! ## Usage
//!
//! ```bash
//! pulse --config ./config/pulse.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pulse collect` | Fetch all configured areas and merge today's snapshot into the history |
//! | `pulse merge <metrics> <cache> <areas> <output> [days]` | Merge a metrics object into a history file without calling the API |
//! | `pulse areas` | List built-in areas |
//!
//! ## Examples
//!
//! ```bash
//! # Repository statistics, defaults from the environment
//! GITHUB_TOKEN=... GITHUB_STATS_REPOSITORY=acme/widgets DASHBUILD_DIR=site pulse collect
//!
//! # Security alerts with a persistent cache
//! pulse collect --module dependabot --repository acme/widgets \
//!     --cache-file .cache/dependabot.json --output site/data/dependabot.json
//!
//! # Merge metrics produced by another tool
//! pulse merge '{"coverage": 81.5}' .cache/cov.json coverage site/data/cov.json 90
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use repo_pulse::config::{self, Module};
use repo_pulse::history::{merge_history, MergeRequest};
use repo_pulse::models::MetricSnapshot;
use repo_pulse::traits::AreaRegistry;
use repo_pulse::{logging, pipeline};

/// repo-pulse: GitHub metrics history for dashboards.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Environment variables override the file, and flags override both.
#[derive(Parser)]
#[command(
    name = "pulse",
    about = "Collect GitHub repository metrics into a daily history file",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pulse.toml`. A missing file is fine; every
    /// setting can come from the environment.
    #[arg(long, global = true, default_value = "./config/pulse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch metrics for one repository and update the history.
    ///
    /// Exits non-zero only for configuration errors and API rate-limit
    /// exhaustion. Individual areas that fail are reported and skipped.
    Collect {
        /// Module preset: `github-statistics` or `dependabot`.
        #[arg(long)]
        module: Option<Module>,

        /// Target repository as `owner/repo`.
        #[arg(long)]
        repository: Option<String>,

        /// Comma-separated area list, e.g. `prs,issues`.
        #[arg(long)]
        areas: Option<String>,

        /// Output file. Defaults to `$DASHBUILD_DIR/src/data/<module>.json`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Cache file carrying history between runs. Empty disables it.
        #[arg(long)]
        cache_file: Option<String>,

        /// Days of history to keep (0 = unlimited).
        #[arg(long)]
        retention_days: Option<u32>,

        /// Maximum number of areas fetched at once.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Merge a metrics object into a history file.
    ///
    /// Writes `{config: {areas}, history}` to the output and, when a cache
    /// path is given, to the cache as well.
    Merge {
        /// Today's metrics as a JSON object, e.g. `'{"open": 5}'`.
        metrics: String,

        /// Cache file path; pass `""` to disable.
        cache_file: String,

        /// Comma-separated area list recorded in the document.
        areas: String,

        /// Output file path.
        output: PathBuf,

        /// Days of history to keep (0 = unlimited).
        #[arg(default_value_t = 0)]
        retention_days: u32,
    },

    /// List built-in areas.
    Areas,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            module,
            repository,
            areas,
            output,
            cache_file,
            retention_days,
            concurrency,
        } => {
            let mut cfg = config::load_config(&cli.config, module)?;
            if let Some(repository) = repository {
                cfg.collect.repository = Some(repository);
            }
            if let Some(areas) = areas {
                cfg.collect.areas = Some(config::parse_area_list(&areas));
            }
            if let Some(output) = output {
                cfg.output.path = Some(output);
            }
            if let Some(cache_file) = cache_file {
                cfg.collect.cache_file = cache_file;
            }
            if let Some(days) = retention_days {
                cfg.collect.retention_days = days;
            }
            if let Some(concurrency) = concurrency {
                cfg.collect.concurrency = concurrency;
            }

            let summary = pipeline::run_collect(&cfg).await?;
            summary.print();
        }
        Commands::Merge {
            metrics,
            cache_file,
            areas,
            output,
            retention_days,
        } => {
            run_merge(&metrics, &cache_file, &areas, &output, retention_days)?;
        }
        Commands::Areas => {
            let cfg = config::load_config(&cli.config, None)?;
            list_areas(cfg.collect.module);
        }
    }

    Ok(())
}

fn run_merge(
    metrics: &str,
    cache_file: &str,
    areas: &str,
    output: &Path,
    retention_days: u32,
) -> anyhow::Result<()> {
    let todays_metrics: MetricSnapshot = serde_json::from_str(metrics).map_err(|e| {
        anyhow::anyhow!(
            "metrics must be a JSON object of numbers and strings: {}",
            e
        )
    })?;
    let areas = config::parse_area_list(areas);
    let cache = Some(cache_file.trim())
        .filter(|c| !c.is_empty())
        .map(Path::new);

    let doc = merge_history(&MergeRequest {
        todays_metrics: &todays_metrics,
        cache_file: cache,
        areas: &areas,
        output_file: output,
        retention_days,
    })?;

    println!("merge");
    println!("  entries: {}", doc.history.len());
    println!("  output: {}", output.display());
    println!("ok");
    Ok(())
}

fn list_areas(module: Module) {
    let registry = AreaRegistry::builtin();
    let defaults = module.default_areas();
    println!("{:<18} {:<8} DESCRIPTION", "AREA", "DEFAULT");
    for area in registry.areas() {
        let is_default = if defaults.contains(&area.name()) { "yes" } else { "" };
        println!("{:<18} {:<8} {}", area.name(), is_default, area.description());
    }
}
