//! Small numeric and calendar helpers shared by the area fetchers.
//!
//! All rates are rounded with [`round1`] so output stays stable across runs,
//! and medians use the same nearest-rank rule as [`percentile`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Value};

/// Round to one decimal place, half away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Nearest-rank percentile: sort ascending, take index `ceil(p/100 * n) - 1`.
///
/// Returns 0 for an empty sample.
pub fn percentile(sample: &[f64], p: f64) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let mut sorted = sample.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    sorted[idx]
}

/// Median as the 50th nearest-rank percentile (lower middle for even sizes).
pub fn median(sample: &[f64]) -> f64 {
    percentile(sample, 50.0)
}

/// Percentage of `part` in `total`, rounded to one decimal; 0 when empty.
pub fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(part as f64 / total as f64 * 100.0)
    }
}

/// Fixed-boundary histogram of ages in days: 0-7, 7-14, 14-30, 30+.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AgingBuckets {
    pub week: u64,
    pub two_weeks: u64,
    pub month: u64,
    pub older: u64,
}

impl AgingBuckets {
    pub fn add(&mut self, age_days: f64) {
        if age_days <= 7.0 {
            self.week += 1;
        } else if age_days <= 14.0 {
            self.two_weeks += 1;
        } else if age_days <= 30.0 {
            self.month += 1;
        } else {
            self.older += 1;
        }
    }

    pub fn to_json(self) -> Value {
        json!({
            "0-7": self.week,
            "7-14": self.two_weeks,
            "14-30": self.month,
            "30+": self.older,
        })
    }
}

/// Fractional days between two instants.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 86_400.0
}

/// Fractional hours between two instants.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3_600.0
}

/// Subtract whole calendar days from a UTC date.
///
/// Saturates at the minimum representable date instead of panicking.
pub fn subtract_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Parse an RFC 3339 timestamp from a JSON field.
pub fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
