//! Database and wire model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored target.
///
/// The literal `target` string is the identity used everywhere, including
/// the history log; `id` always mirrors it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub display_name: String,
    pub target: String,
    pub is_highlighted: bool,
}

impl Target {
    pub fn new(display_name: &str, target: &str, is_highlighted: bool) -> Self {
        Self {
            id: target.to_string(),
            display_name: display_name.to_string(),
            target: target.to_string(),
            is_highlighted,
        }
    }
}

/// One hop reported by a path trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub hop: u32,
    pub ip: String,
    /// Round-trip time in milliseconds
    pub latency: f64,
    pub is_slow: bool,
}

/// A parsed probe result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub total_hops: u32,
    pub fastest_hop: f64,
    pub slowest_hop: f64,
    pub slow_hops_count: u32,
    #[serde(default)]
    pub detailed_hops: Vec<Hop>,
}

impl Measurement {
    /// Hop IPs joined in order. Two measurements took the same path when
    /// their signatures are equal.
    pub fn route_signature(&self) -> String {
        self.detailed_hops
            .iter()
            .map(|h| h.ip.as_str())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Arithmetic mean of hop latencies, or `None` without hops.
    pub fn mean_latency(&self) -> Option<f64> {
        if self.detailed_hops.is_empty() {
            return None;
        }
        let sum: f64 = self.detailed_hops.iter().map(|h| h.latency).sum();
        Some(sum / self.detailed_hops.len() as f64)
    }

    pub fn has_hops(&self) -> bool {
        !self.detailed_hops.is_empty()
    }
}

/// A retained, timestamped measurement for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub display_name: String,
    pub data: Measurement,
}

/// A target that has retained history, as listed by the history views.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetainedTarget {
    pub target: String,
    pub display_name: String,
}

/// Comparison of a fresh measurement against retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftAnalysis {
    pub hop_change_d: Option<i64>,
    #[serde(rename = "hopChange7D")]
    pub hop_change_7d: Option<i64>,
    pub route_changed: bool,
    pub latency_changed: bool,
}

/// One named series of a bucketed chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Named numeric series aligned to an ordered list of bucket labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketedSeries {
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl BucketedSeries {
    /// Look up a series by name.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.values.as_slice())
    }
}
