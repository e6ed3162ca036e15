//! Drift detection between a fresh measurement and retained history.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::db::{DriftAnalysis, HistoryEntry, Measurement};

/// Look-back windows and the latency tolerance used by [`DriftAnalyzer`].
#[derive(Debug, Clone, Copy)]
pub struct DriftConfig {
    /// Age of the "yesterday" comparison point.
    pub day_window: ChronoDuration,
    /// Age of the "last week" comparison point.
    pub week_window: ChronoDuration,
    /// Relative change in mean hop latency above which latency counts as
    /// changed (0.2 = 20%).
    pub latency_change_ratio: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            day_window: ChronoDuration::hours(24),
            week_window: ChronoDuration::days(7),
            latency_change_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriftAnalyzer {
    config: DriftConfig,
}

impl DriftAnalyzer {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    /// Compare `current` for `target` against that target's retained history.
    ///
    /// Hop-count deltas are taken against the newest entry that is at least
    /// a day (or a week) old. Route and latency changes are taken against
    /// the latest entry.
    pub fn analyze(
        &self,
        target: &str,
        current: &Measurement,
        history: &[HistoryEntry],
        now: DateTime<Utc>,
    ) -> DriftAnalysis {
        let entries: Vec<&HistoryEntry> = history.iter().filter(|e| e.target == target).collect();
        let last = match entries.last() {
            Some(e) => *e,
            None => return DriftAnalysis::default(),
        };

        let at_or_before = |cutoff: DateTime<Utc>| {
            entries.iter().rev().find(|e| e.timestamp <= cutoff).copied()
        };
        let hop_change = |entry: Option<&HistoryEntry>| {
            entry.map(|e| current.total_hops as i64 - e.data.total_hops as i64)
        };

        let mut analysis = DriftAnalysis {
            hop_change_d: hop_change(at_or_before(now - self.config.day_window)),
            hop_change_7d: hop_change(at_or_before(now - self.config.week_window)),
            route_changed: false,
            latency_changed: false,
        };

        if last.data.has_hops() && current.has_hops() {
            analysis.route_changed = last.data.route_signature() != current.route_signature();

            if let (Some(previous), Some(latest)) =
                (last.data.mean_latency(), current.mean_latency())
            {
                if previous > 0.0 {
                    analysis.latency_changed =
                        (latest - previous).abs() / previous > self.config.latency_change_ratio;
                }
            }
        }

        analysis
    }
}
