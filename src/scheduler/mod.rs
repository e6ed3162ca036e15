//! Scheduler module for running probes and retaining their results.

mod writer;

pub use writer::*;

use crate::analysis::{DriftAnalyzer, DriftConfig};
use crate::config::SettingsHandle;
use crate::db::{DriftAnalysis, HistoryEntry, HistoryStore, Measurement, Store, Target};
use crate::probe::{parse_traceroute, FailureKind, ProbeError, ProbeRunner};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;

/// A request to probe one target.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub target: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_highlighted: bool,
    /// Overrides the configured slow hop threshold for this probe only
    #[serde(default)]
    pub slow_hop_threshold: Option<f64>,
}

impl From<&Target> for ProbeRequest {
    fn from(target: &Target) -> Self {
        Self {
            target: target.target.clone(),
            display_name: target.display_name.clone(),
            is_highlighted: target.is_highlighted,
            slow_hop_threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success {
        data: Measurement,
        analysis: DriftAnalysis,
    },
    Failure {
        kind: FailureKind,
    },
}

/// The displayable outcome of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub target: String,
    pub display_name: String,
    pub is_highlighted: bool,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    fn failed(request: ProbeRequest, kind: FailureKind) -> Self {
        Self {
            target: request.target,
            display_name: request.display_name,
            is_highlighted: request.is_highlighted,
            outcome: ProbeOutcome::Failure { kind },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Success { .. })
    }

    /// The history entry to retain for this result, if any. Only successful
    /// probes of highlighted targets are retained.
    pub fn history_entry(&self, timestamp: DateTime<Utc>) -> Option<HistoryEntry> {
        match &self.outcome {
            ProbeOutcome::Success { data, .. } if self.is_highlighted => Some(HistoryEntry {
                timestamp,
                target: self.target.clone(),
                display_name: self.display_name.clone(),
                data: data.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeResultWire<'a> {
    id: &'a str,
    target: &'a str,
    display_name: &'a str,
    is_highlighted: bool,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Measurement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<&'a DriftAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,
}

impl Serialize for ProbeResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut wire = ProbeResultWire {
            id: &self.target,
            target: &self.target,
            display_name: &self.display_name,
            is_highlighted: self.is_highlighted,
            success: false,
            data: None,
            analysis: None,
            error: None,
            error_kind: None,
        };
        match &self.outcome {
            ProbeOutcome::Success { data, analysis } => {
                wire.success = true;
                wire.data = Some(data);
                wire.analysis = Some(analysis);
            }
            ProbeOutcome::Failure { kind } => {
                wire.error = Some(kind.message());
                wire.error_kind = Some(*kind);
            }
        }
        wire.serialize(serializer)
    }
}

/// Probe limits and analysis tuning.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub concurrency: usize,
    pub drift: DriftConfig,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            concurrency: 20,
            drift: DriftConfig::default(),
        }
    }
}

/// Runs probes, analyzes them against history and queues retention.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<Store>,
    history: Arc<HistoryStore>,
    writer: HistoryWriter,
    runner: Arc<dyn ProbeRunner>,
    settings: SettingsHandle,
    analyzer: DriftAnalyzer,
    options: ProbeOptions,
    refresh_stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl Scheduler {
    /// Create a new scheduler. Spawns the history writer task.
    pub fn new(
        store: Arc<Store>,
        history: Arc<HistoryStore>,
        runner: Arc<dyn ProbeRunner>,
        settings: SettingsHandle,
        options: ProbeOptions,
    ) -> Self {
        let writer = HistoryWriter::spawn(history.clone());

        Self {
            store,
            history,
            writer,
            runner,
            settings,
            analyzer: DriftAnalyzer::new(options.drift),
            options,
            refresh_stop: Arc::new(Mutex::new(None)),
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn writer(&self) -> &HistoryWriter {
        &self.writer
    }

    /// Start periodic refresh at the configured interval.
    pub async fn start(&self) {
        let settings = self.settings.get().await;
        tracing::info!(
            "Starting scheduler (refresh every {}s, {} concurrent probes)",
            settings.refresh_interval,
            self.options.concurrency
        );
        self.reschedule(settings.refresh_interval).await;
    }

    /// Replace the periodic refresh with one every `interval_secs` seconds,
    /// or stop it for 0. Probes already running are left to finish.
    pub async fn reschedule(&self, interval_secs: u64) {
        let mut stop = self.refresh_stop.lock().await;
        if let Some(old) = stop.take() {
            let _ = old.send(());
        }

        if interval_secs == 0 {
            tracing::info!("Scheduler: periodic refresh disabled");
            return;
        }

        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        *stop = Some(stop_tx);
        drop(stop);

        let scheduler = self.clone();
        let period = Duration::from_secs(interval_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        let results = scheduler.sweep_all().await;
                        let failed = results.iter().filter(|r| !r.is_success()).count();
                        tracing::info!(
                            "Scheduler: refreshed {} targets ({} failed)",
                            results.len(),
                            failed
                        );
                    }
                }
            }
        });

        tracing::info!("Scheduler: refreshing every {}s", interval_secs);
    }

    /// Probe one target. Always yields a result; runner errors and timeouts
    /// become failure results.
    pub async fn run_probe(&self, request: ProbeRequest) -> ProbeResult {
        let timeout = self.options.timeout;
        let raw = match tokio::time::timeout(timeout, self.runner.run(&request.target)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        let output = match raw {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Probe failed for {}: {}", request.target, e);
                let result = ProbeResult::failed(request, e.kind());
                self.writer.log(&result);
                return result;
            }
        };

        let threshold = match request.slow_hop_threshold {
            Some(t) if t.is_finite() && t > 0.0 => t,
            _ => self.settings.get().await.slow_hop_threshold,
        };
        let data = parse_traceroute(&output, threshold);
        let history = self.history.read(&request.target).await;
        let analysis = self
            .analyzer
            .analyze(&request.target, &data, &history, Utc::now());

        tracing::debug!(
            "Probe for {}: {} hops, {} slow",
            request.target,
            data.total_hops,
            data.slow_hops_count
        );

        let result = ProbeResult {
            target: request.target,
            display_name: request.display_name,
            is_highlighted: request.is_highlighted,
            outcome: ProbeOutcome::Success { data, analysis },
        };
        self.writer.log(&result);
        result
    }

    /// Probe every request with a fixed pool of workers pulling from a
    /// shared queue. Results come back in request order.
    pub async fn run_sweep(&self, requests: Vec<ProbeRequest>) -> Vec<ProbeResult> {
        let total = requests.len();
        let queue = Arc::new(Mutex::new(
            requests.iter().cloned().enumerate().collect::<VecDeque<_>>(),
        ));

        let mut workers = JoinSet::new();
        for _ in 0..self.options.concurrency.max(1).min(total) {
            let queue = queue.clone();
            let scheduler = self.clone();

            workers.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().await.pop_front();
                    let (index, request) = match next {
                        Some(item) => item,
                        None => break,
                    };
                    done.push((index, scheduler.run_probe(request).await));
                }
                done
            });
        }

        let mut results: Vec<Option<ProbeResult>> = vec![None; total];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, result) in done {
                        results[index] = Some(result);
                    }
                }
                Err(e) => tracing::error!("Scheduler: sweep worker failed: {}", e),
            }
        }

        results
            .into_iter()
            .zip(requests)
            .map(|(result, request)| {
                result.unwrap_or_else(|| ProbeResult::failed(request, FailureKind::Execution))
            })
            .collect()
    }

    /// Probe every configured target.
    pub async fn sweep_all(&self) -> Vec<ProbeResult> {
        let targets = match self.store.get_targets() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("Scheduler: Failed to get targets: {}", e);
                return Vec::new();
            }
        };

        self.run_sweep(targets.iter().map(ProbeRequest::from).collect())
            .await
    }
}
