//! # repo-pulse
//!
//! Collects point-in-time engineering metrics from the GitHub REST API and
//! accumulates them into a per-day history file that dashboard pages render.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  ApiClient  │◀──│ Area        │──▶│  collect()   │
//! │ pages/limit │   │ fetchers    │   │ merge by     │
//! └─────────────┘   └─────────────┘   │ area order   │
//!                                     └──────┬───────┘
//!                                            ▼
//!                                     ┌──────────────┐
//!                                     │ merge_history│──▶ output + cache
//!                                     │ dedupe/prune │
//!                                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GITHUB_TOKEN=...
//! pulse collect --repository acme/widgets --output data/github-statistics.json
//! pulse collect --module dependabot --repository acme/widgets --output data/dependabot.json
//! pulse areas
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`client`] | Paginated, rate-limit-aware GitHub client |
//! | [`traits`] | `AreaFetcher` trait, contexts and registry |
//! | [`areas`] | Built-in metric areas |
//! | [`collect`] | Concurrent, failure-isolating orchestration |
//! | [`history`] | Daily history merge, retention and persistence |
//! | [`pipeline`] | End-to-end `collect` run |
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Metric and history data types |
//! | [`stats`] | Percentiles, rounding, aging buckets, dates |
//! | [`error`] | Fatal error conditions |
//! | [`logging`] | Tracing subscriber setup |

pub mod areas;
pub mod client;
pub mod collect;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod stats;
pub mod traits;
