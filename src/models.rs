//! Core data models used throughout repo-pulse.
//!
//! These types represent the metric snapshots, per-area results, and history
//! documents that flow through the collection and merge pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A single metric value.
///
/// Metrics are restricted to this union so that history files stay flat and
/// chartable. Anything else found in a cache file is rejected at the merge
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }

    /// Convert an arbitrary JSON value into a metric value.
    ///
    /// Returns `None` for booleans, nulls, arrays, and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(MetricValue::Int)
                .or_else(|| n.as_f64().map(MetricValue::Float)),
            Value::String(s) => Some(MetricValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
            MetricValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// Flat mapping from metric name to value for one collection run.
pub type MetricSnapshot = BTreeMap<String, MetricValue>;

/// Point-in-time detail records keyed by detail name.
pub type DetailPayload = Map<String, Value>;

/// Output of a single area fetcher.
#[derive(Debug, Clone, Default)]
pub struct AreaResult {
    pub metrics: MetricSnapshot,
    pub details: DetailPayload,
}

impl AreaResult {
    /// Start an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric, builder style.
    pub fn metric(mut self, name: &str, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    /// Add a detail record, builder style.
    pub fn detail(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.details.insert(name.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.details.is_empty()
    }
}

/// One day in the metric history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// UTC calendar date, serialized as `YYYY-MM-DD`.
    pub date: NaiveDate,
    pub metrics: MetricSnapshot,
}

/// The `config` block of a history document.
///
/// Only `areas` is owned by the history store; collectors add their own
/// fields (repository, lookback, visibility) through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The on-disk document shared by the output file and the cache file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub config: DocumentConfig,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: DetailPayload,
}

impl HistoryDocument {
    /// The most recent entry, if any.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}
