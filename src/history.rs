//! Daily metric history with retention.
//!
//! The history is a list of `{date, metrics}` entries, one per UTC day,
//! strictly ascending. Each run:
//!
//! 1. loads the previous history from the cache file (if any),
//! 2. replaces today's entry with the fresh snapshot,
//! 3. drops entries older than the retention window,
//! 4. writes the document to the output file and the cache file.
//!
//! A missing or unreadable cache is not an error; the history simply starts
//! over. Entries that do not parse (bad date, non-scalar metric) are dropped
//! one by one so a single damaged entry does not cost the whole series.
//!
//! # Locking
//!
//! When a cache is configured, the read-merge-write sequence holds an
//! exclusive advisory lock on a sidecar `<cache>.lock`, so two runs sharing a
//! cache cannot interleave and produce two entries for the same day. Nothing
//! is created next to the output file except the output itself.
//!
//! Written files keep the mode of the file they replace; new files get
//! `0644` on Unix.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::{DocumentConfig, HistoryDocument, HistoryEntry, MetricSnapshot};
use crate::stats::subtract_days;

/// Inputs to [`merge_history`].
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub todays_metrics: &'a MetricSnapshot,
    /// `None` disables the cache.
    pub cache_file: Option<&'a Path>,
    pub areas: &'a [String],
    pub output_file: &'a Path,
    /// Days to keep; 0 keeps everything.
    pub retention_days: u32,
}

/// Merge today's metrics into the history and persist it.
pub fn merge_history(req: &MergeRequest<'_>) -> Result<HistoryDocument> {
    merge_history_on(Utc::now().date_naive(), req)
}

/// [`merge_history`] with an explicit "today".
pub fn merge_history_on(today: NaiveDate, req: &MergeRequest<'_>) -> Result<HistoryDocument> {
    let _lock = lock_cache(req.cache_file)?;

    let mut history = match req.cache_file {
        Some(cache) => load_cache(cache),
        None => Vec::new(),
    };
    history.retain(|entry| entry.date != today);
    history.push(HistoryEntry {
        date: today,
        metrics: req.todays_metrics.clone(),
    });

    let mut history = normalize(history);
    let pruned = prune(&mut history, today, req.retention_days);
    if pruned > 0 {
        info!(pruned, retention_days = req.retention_days, "pruned history entries");
    }

    let doc = HistoryDocument {
        config: DocumentConfig {
            areas: req.areas.to_vec(),
            extra: Map::new(),
        },
        history,
        details: Map::new(),
    };
    write_targets(&doc, req.output_file, req.cache_file)?;
    Ok(doc)
}

/// Persist a finished document to the output file and optional cache.
///
/// Used after the caller has layered details and config extras onto the
/// document returned by [`merge_history`].
pub fn write_document(doc: &HistoryDocument, output: &Path, cache: Option<&Path>) -> Result<()> {
    let _lock = lock_cache(cache)?;
    write_targets(doc, output, cache)
}

fn write_targets(doc: &HistoryDocument, output: &Path, cache: Option<&Path>) -> Result<()> {
    let mut json = serde_json::to_string_pretty(doc)?;
    json.push('\n');

    write_atomic(output, json.as_bytes())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(path = %output.display(), entries = doc.history.len(), "history written");

    if let Some(cache) = cache {
        write_atomic(cache, json.as_bytes())
            .with_context(|| format!("Failed to write cache {}", cache.display()))?;
        info!(path = %cache.display(), "cache updated");
    }
    Ok(())
}

/// Read the history stored in a cache file.
///
/// Never fails: an absent, unreadable, or malformed cache yields an empty
/// history, and individually malformed entries are skipped.
pub fn load_cache(path: &Path) -> Vec<HistoryEntry> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            info!(path = %path.display(), error = %e, "no usable cache, starting fresh");
            return Vec::new();
        }
    };
    let doc: Value = match serde_json::from_str(&content) {
        Ok(doc) => doc,
        Err(e) => {
            info!(path = %path.display(), error = %e, "cache is not valid JSON, starting fresh");
            return Vec::new();
        }
    };
    let Some(entries) = doc.get("history").and_then(Value::as_array) else {
        info!(path = %path.display(), "cache has no history, starting fresh");
        return Vec::new();
    };

    let mut history = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<HistoryEntry>(entry.clone()) {
            Ok(entry) => history.push(entry),
            Err(e) => warn!(path = %path.display(), index = idx, error = %e, "dropping invalid history entry"),
        }
    }
    info!(path = %path.display(), entries = history.len(), "loaded cached history");
    history
}

/// Sort ascending by date; when a date repeats, the last occurrence wins.
fn normalize(mut history: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    history.sort_by_key(|entry| entry.date);
    let mut out: Vec<HistoryEntry> = Vec::with_capacity(history.len());
    for entry in history {
        match out.last_mut() {
            Some(last) if last.date == entry.date => *last = entry,
            _ => out.push(entry),
        }
    }
    out
}

/// Drop entries older than `today - retention_days`. Returns how many went.
fn prune(history: &mut Vec<HistoryEntry>, today: NaiveDate, retention_days: u32) -> usize {
    if retention_days == 0 {
        return 0;
    }
    let cutoff = subtract_days(today, retention_days);
    let before = history.len();
    history.retain(|entry| entry.date >= cutoff);
    before - history.len()
}

/// Atomic write: temp file in the target directory, then rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;

    // NamedTempFile is created 0600; don't let that leak into published files.
    let permissions = match fs::metadata(path) {
        Ok(meta) => meta.permissions(),
        Err(_) => new_file_permissions(tmp.as_file())?,
    };
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(unix)]
fn new_file_permissions(_file: &fs::File) -> std::io::Result<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions(file: &fs::File) -> std::io::Result<fs::Permissions> {
    file.metadata().map(|m| m.permissions())
}

/// Holds an exclusive lock until dropped.
struct LockGuard {
    _file: fs::File,
}

/// Lock the cache's sidecar, if there is a cache.
fn lock_cache(cache: Option<&Path>) -> Result<Option<LockGuard>> {
    cache.map(|c| lock_file(&sidecar_lock(c))).transpose()
}

fn lock_file(path: &Path) -> Result<LockGuard> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("Failed to lock {}", path.display()))?;
    Ok(LockGuard { _file: file })
}

fn sidecar_lock(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}
