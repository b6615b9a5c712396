//! End-to-end tests that drive the `pulse` binary.

mod common;

use chrono::Utc;
use common::{MockApi, Reply};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tokio::process::Command;

/// Run `pulse` with a clean environment plus `envs`.
async fn run_pulse(config: &Path, args: &[&str], envs: &[(&str, &str)]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_pulse");
    let output = Command::new(binary)
        .env_clear()
        .envs(envs.iter().copied())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .await
        .unwrap_or_else(|e| panic!("Failed to run pulse binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[tokio::test]
async fn merge_writes_output_and_cache() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("missing.toml");
    let output = tmp.path().join("site/data/cov.json");
    let cache = tmp.path().join(".cache/cov.json");

    let (stdout, stderr, ok) = run_pulse(
        &config,
        &[
            "merge",
            r#"{"coverage": 81.5, "files": 40}"#,
            cache.to_str().unwrap(),
            "coverage, files",
            output.to_str().unwrap(),
        ],
        &[],
    )
    .await;
    assert!(ok, "merge failed: {}", stderr);
    assert!(stdout.contains("entries: 1"), "{}", stdout);

    let doc = read_json(&output);
    assert_eq!(doc["config"]["areas"], json!(["coverage", "files"]));
    assert_eq!(doc["history"][0]["date"], json!(today()));
    assert_eq!(doc["history"][0]["metrics"]["coverage"], json!(81.5));
    assert_eq!(read_json(&cache), doc);
}

#[tokio::test]
async fn same_day_merge_replaces_entry() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("missing.toml");
    let output = tmp.path().join("out.json");
    let cache = tmp.path().join("cache.json");
    let args = |metrics: &'static str| {
        vec![
            "merge".to_string(),
            metrics.to_string(),
            cache.to_str().unwrap().to_string(),
            "open".to_string(),
            output.to_str().unwrap().to_string(),
            "30".to_string(),
        ]
    };

    for metrics in [r#"{"open": 1}"#, r#"{"open": 2}"#] {
        let owned = args(metrics);
        let argv: Vec<&str> = owned.iter().map(String::as_str).collect();
        let (_, stderr, ok) = run_pulse(&config, &argv, &[]).await;
        assert!(ok, "merge failed: {}", stderr);
    }

    let doc = read_json(&output);
    let history = doc["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["metrics"]["open"], json!(2));
}

#[tokio::test]
async fn merge_rejects_non_scalar_metrics() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("out.json");

    let (_, stderr, ok) = run_pulse(
        &tmp.path().join("missing.toml"),
        &["merge", r#"{"labels": ["a"]}"#, "", "labels", output.to_str().unwrap()],
        &[],
    )
    .await;
    assert!(!ok);
    assert!(stderr.contains("metrics must be a JSON object"), "{}", stderr);
    assert!(!output.exists());
}

#[tokio::test]
async fn collect_requires_a_token() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("out.json");

    let (_, stderr, ok) = run_pulse(
        &tmp.path().join("missing.toml"),
        &[
            "collect",
            "--repository",
            "o/r",
            "--output",
            output.to_str().unwrap(),
        ],
        &[],
    )
    .await;
    assert!(!ok);
    assert!(stderr.contains("GITHUB_TOKEN is not set"), "{}", stderr);
    assert!(!output.exists());
}

#[tokio::test]
async fn collect_against_mock_api() {
    let mock = MockApi::start().await;
    mock.route(
        "/repos/o/r",
        Reply::json(json!({"full_name": "o/r", "private": false, "forks_count": 3})),
    )
    .route(
        "/repos/o/r/languages",
        Reply::json(json!({"Rust": 52000, "Shell": 800})),
    );

    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("pulse.toml");
    fs::write(
        &config,
        "[collect]\nrepository = \"o/r\"\nlookback_days = 30\n",
    )
    .unwrap();
    let output = tmp.path().join("stats.json");

    let (stdout, stderr, ok) = run_pulse(
        &config,
        &[
            "collect",
            "--areas",
            "languages,forks",
            "--output",
            output.to_str().unwrap(),
        ],
        &[("GITHUB_TOKEN", "test-token"), ("GITHUB_API_URL", mock.base_url.as_str())],
    )
    .await;
    assert!(ok, "collect failed: {}", stderr);
    assert!(stdout.contains("collect o/r"), "{}", stdout);
    assert!(stdout.contains("areas ok: languages, forks"), "{}", stdout);

    let doc = read_json(&output);
    assert_eq!(doc["config"]["areas"], json!(["languages", "forks"]));
    assert_eq!(doc["config"]["repository"], "o/r");
    assert_eq!(doc["config"]["lookbackDays"], 30);
    assert_eq!(doc["config"]["visibility"], "public");
    assert_eq!(doc["history"][0]["metrics"], json!({"forks_total": 3}));
    assert_eq!(doc["details"]["languages"]["Rust"], 52000);
    assert_eq!(mock.hits().iter().filter(|h| h.key == "/repos/o/r").count(), 1);
}

#[tokio::test]
async fn rate_limited_collect_writes_nothing() {
    let mock = MockApi::start().await;
    mock.route("/repos/o/r", Reply::rate_limited());

    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("stats.json");
    let cache = tmp.path().join("cache.json");

    let (_, stderr, ok) = run_pulse(
        &tmp.path().join("missing.toml"),
        &[
            "collect",
            "--areas",
            "forks",
            "--output",
            output.to_str().unwrap(),
            "--cache-file",
            cache.to_str().unwrap(),
        ],
        &[
            ("GITHUB_TOKEN", "test-token"),
            ("GITHUB_API_URL", mock.base_url.as_str()),
            ("GITHUB_STATS_REPOSITORY", "o/r"),
        ],
    )
    .await;
    assert!(!ok);
    assert!(stderr.contains("rate limit exceeded"), "{}", stderr);
    assert!(!output.exists());
    assert!(!cache.exists());
}

#[tokio::test]
async fn areas_lists_builtins() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, ok) = run_pulse(&tmp.path().join("missing.toml"), &["areas"], &[]).await;
    assert!(ok, "areas failed: {}", stderr);
    for area in ["prs", "issues", "workflows", "dependabot", "secret-scanning"] {
        assert!(stdout.contains(area), "missing {}: {}", area, stdout);
    }
}
