//! Hourly and daily trend buckets over retained history.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{BucketedSeries, HistoryEntry, HistoryStore, Series};

/// Minimum retained entries before a target gets charts.
pub const MIN_TREND_ENTRIES: usize = 2;

pub const AVG_LATENCY_MS: &str = "avgLatencyMs";
pub const AVG_HOPS: &str = "avgHops";
pub const ROUTE_CHANGES: &str = "routeChanges";
pub const MAX_LATENCY_MS: &str = "maxLatencyMs";
pub const MIN_LATENCY_MS: &str = "minLatencyMs";

/// Trend error types.
#[derive(Error, Debug, PartialEq)]
pub enum TrendError {
    #[error("not enough history for {target}: {found} entries, need at least 2")]
    InsufficientHistory { target: String, found: usize },
    #[error("unknown granularity: {0}")]
    UnknownGranularity(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
}

impl FromStr for Granularity {
    type Err = TrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Granularity::Hourly),
            "daily" => Ok(Granularity::Daily),
            other => Err(TrendError::UnknownGranularity(other.to_string())),
        }
    }
}

/// Both chart views for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Trends {
    pub hourly: BucketedSeries,
    pub daily: BucketedSeries,
}

/// One chart view for one target, ready to serve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub target: String,
    pub display_name: String,
    pub granularity: Granularity,
    pub series: BucketedSeries,
}

/// Build the requested chart for `target` from the history store.
///
/// Targets with fewer than [`MIN_TREND_ENTRIES`] retained entries are
/// reported as [`TrendError::InsufficientHistory`] rather than as an empty
/// chart.
pub async fn bucketed_trends<Tz: TimeZone>(
    history: &HistoryStore,
    target: &str,
    granularity: Granularity,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<TrendReport, TrendError> {
    let entries = history.read(target).await;
    if entries.len() < MIN_TREND_ENTRIES {
        return Err(TrendError::InsufficientHistory {
            target: target.to_string(),
            found: entries.len(),
        });
    }

    let series = match granularity {
        Granularity::Hourly => hourly_buckets(&entries, now, tz),
        Granularity::Daily => daily_buckets(&entries, now, tz),
    };

    Ok(TrendReport {
        target: target.to_string(),
        display_name: entries[0].display_name.clone(),
        granularity,
        series,
    })
}

/// Compute both views over `history`.
pub fn aggregate<Tz: TimeZone>(history: &[HistoryEntry], now: DateTime<Utc>, tz: &Tz) -> Trends {
    Trends {
        hourly: hourly_buckets(history, now, tz),
        daily: daily_buckets(history, now, tz),
    }
}

#[derive(Default)]
struct HourBucket {
    latencies: Vec<f64>,
    hops: Vec<f64>,
    routes: HashSet<String>,
    route_changes: u32,
}

/// 24 hour-of-day buckets covering the day before `now`, oldest first.
///
/// Entries land in the bucket for their local hour of day, so an entry
/// from just over 23 hours ago shares the current hour's bucket. Only
/// entries with hop detail count. A bucket's route change counter goes up
/// each time an entry brings a route the bucket has not seen yet, after
/// the first.
///
/// On a day the clock falls back, the repeated hour gets a single bucket,
/// leaving 23.
pub fn hourly_buckets<Tz: TimeZone>(
    history: &[HistoryEntry],
    now: DateTime<Utc>,
    tz: &Tz,
) -> BucketedSeries {
    let (labels, slot_for_hour) = hour_slots(
        (0..24).map(|i| (now - ChronoDuration::hours(23 - i)).with_timezone(tz).hour()),
    );
    let mut buckets: Vec<HourBucket> = labels.iter().map(|_| HourBucket::default()).collect();

    let since = now - ChronoDuration::hours(24);
    let mut window: Vec<&HistoryEntry> = history
        .iter()
        .filter(|e| e.timestamp >= since && e.data.has_hops())
        .collect();
    window.sort_by_key(|e| e.timestamp);

    for entry in window {
        let hour = entry.timestamp.with_timezone(tz).hour();
        let bucket = match slot_for_hour.get(&hour) {
            Some(&slot) => &mut buckets[slot],
            None => continue,
        };

        if let Some(mean) = entry.data.mean_latency() {
            bucket.latencies.push(mean);
        }
        bucket.hops.push(entry.data.total_hops as f64);
        if bucket.routes.insert(entry.data.route_signature()) && bucket.routes.len() > 1 {
            bucket.route_changes += 1;
        }
    }

    BucketedSeries {
        labels,
        series: vec![
            Series {
                name: AVG_LATENCY_MS.to_string(),
                values: buckets.iter().map(|b| round_to(mean(&b.latencies), 2)).collect(),
            },
            Series {
                name: AVG_HOPS.to_string(),
                values: buckets.iter().map(|b| round_to(mean(&b.hops), 1)).collect(),
            },
            Series {
                name: ROUTE_CHANGES.to_string(),
                values: buckets.iter().map(|b| b.route_changes as f64).collect(),
            },
        ],
    }
}

/// Labels and slot lookup for consecutive local hours of day. An hour that
/// repeats keeps its first slot.
fn hour_slots(hours: impl IntoIterator<Item = u32>) -> (Vec<String>, HashMap<u32, usize>) {
    let mut labels = Vec::with_capacity(24);
    let mut slot_for_hour = HashMap::new();
    for hour in hours {
        if !slot_for_hour.contains_key(&hour) {
            slot_for_hour.insert(hour, labels.len());
            labels.push(format!("{:02}h", hour));
        }
    }
    (labels, slot_for_hour)
}

struct DayBucket {
    hops: Vec<f64>,
    max_latency: f64,
    min_latency: f64,
}

/// One bucket per local calendar day with entries in the week before `now`,
/// labelled `DD/MM` and ordered by date. Days without entries are left out.
pub fn daily_buckets<Tz: TimeZone>(
    history: &[HistoryEntry],
    now: DateTime<Utc>,
    tz: &Tz,
) -> BucketedSeries {
    let since = now - ChronoDuration::days(7);
    let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();

    for entry in history.iter().filter(|e| e.timestamp >= since) {
        let day = entry.timestamp.with_timezone(tz).date_naive();
        let bucket = days.entry(day).or_insert(DayBucket {
            hops: Vec::new(),
            max_latency: f64::NEG_INFINITY,
            min_latency: f64::INFINITY,
        });
        bucket.hops.push(entry.data.total_hops as f64);
        bucket.max_latency = bucket.max_latency.max(entry.data.slowest_hop);
        bucket.min_latency = bucket.min_latency.min(entry.data.fastest_hop);
    }

    let mut series = BucketedSeries {
        labels: days.keys().map(|d| d.format("%d/%m").to_string()).collect(),
        series: vec![
            Series { name: AVG_HOPS.to_string(), values: Vec::with_capacity(days.len()) },
            Series { name: MAX_LATENCY_MS.to_string(), values: Vec::with_capacity(days.len()) },
            Series { name: MIN_LATENCY_MS.to_string(), values: Vec::with_capacity(days.len()) },
        ],
    };
    for bucket in days.values() {
        series.series[0].values.push(mean(&bucket.hops));
        series.series[1].values.push(bucket.max_latency);
        series.series[2].values.push(bucket.min_latency);
    }
    series
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
