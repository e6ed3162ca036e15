//! Serialized writer for the history log.
//!
//! Every append-and-prune goes through one consumer task, strictly in the
//! order it was requested, so concurrent probes never interleave their
//! read-modify-write cycles on the shared log.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::db::{HistoryEntry, HistoryStore};

use super::ProbeResult;

enum WriterMessage {
    Append(HistoryEntry),
    Flush(oneshot::Sender<()>),
}

/// Handle for queueing history mutations.
#[derive(Clone)]
pub struct HistoryWriter {
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl HistoryWriter {
    /// Start the writer task for `history`.
    pub fn spawn(history: Arc<HistoryStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_history_writer(rx, history));
        Self { tx }
    }

    /// Queue `result` for retention. Returns whether anything was queued:
    /// results for targets that are not highlighted, and failed probes, have
    /// no hop detail to keep.
    pub fn log(&self, result: &ProbeResult) -> bool {
        let entry = match result.history_entry(Utc::now()) {
            Some(e) => e,
            None => {
                tracing::debug!("HistoryWriter: nothing to retain for {}", result.target);
                return false;
            }
        };

        if self.tx.send(WriterMessage::Append(entry)).is_err() {
            tracing::error!("HistoryWriter: writer stopped, dropping entry for {}", result.target);
            return false;
        }
        true
    }

    /// Wait until every mutation queued before this call has settled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_history_writer(mut rx: mpsc::UnboundedReceiver<WriterMessage>, history: Arc<HistoryStore>) {
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Append(entry) => {
                let target = entry.target.clone();
                let history = history.clone();

                // Run each mutation in its own task so a panic only loses
                // that one entry.
                let outcome = tokio::spawn(async move {
                    history.append_and_prune(entry, Utc::now()).await
                })
                .await;

                match outcome {
                    Ok(Ok(retained)) => {
                        tracing::debug!(
                            "HistoryWriter: logged {} ({} entries retained)",
                            target,
                            retained
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::error!("HistoryWriter: failed to log {}: {}", target, e);
                    }
                    Err(e) => {
                        tracing::error!("HistoryWriter: append task for {} aborted: {}", target, e);
                    }
                }
            }
            WriterMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::MemorySink;
    use crate::db::{DriftAnalysis, Hop, Measurement};
    use crate::probe::FailureKind;
    use crate::scheduler::ProbeOutcome;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn result(target: &str, is_highlighted: bool, outcome: ProbeOutcome) -> ProbeResult {
        ProbeResult {
            target: target.to_string(),
            display_name: target.to_uppercase(),
            is_highlighted,
            outcome,
        }
    }

    fn success(n: u32) -> ProbeOutcome {
        ProbeOutcome::Success {
            data: Measurement {
                total_hops: 1,
                fastest_hop: n as f64,
                slowest_hop: n as f64,
                slow_hops_count: 0,
                detailed_hops: vec![Hop {
                    hop: 1,
                    ip: format!("10.0.0.{}", n % 250),
                    latency: n as f64,
                    is_slow: false,
                }],
            },
            analysis: DriftAnalysis::default(),
        }
    }

    fn history(sink: &Arc<MemorySink>) -> Arc<HistoryStore> {
        Arc::new(HistoryStore::new(sink.clone(), Duration::from_secs(15)))
    }

    #[tokio::test]
    async fn test_concurrent_logs_are_all_retained() {
        let sink = Arc::new(MemorySink::default());
        let history = history(&sink);
        let writer = HistoryWriter::spawn(history.clone());

        let mut tasks = Vec::new();
        for n in 0..50u32 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let target = format!("t{}", n % 5);
                assert!(writer.log(&result(&target, true, success(n))));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        writer.flush().await;

        assert_eq!(history.read_all().await.len(), 50);
        assert_eq!(history.read("t3").await.len(), 10);
    }

    #[tokio::test]
    async fn test_only_highlighted_successes_are_logged() {
        let sink = Arc::new(MemorySink::default());
        let history = history(&sink);
        let writer = HistoryWriter::spawn(history.clone());

        assert!(!writer.log(&result("a", false, success(1))));
        assert!(!writer.log(&result(
            "a",
            true,
            ProbeOutcome::Failure { kind: FailureKind::Timeout }
        )));
        assert!(writer.log(&result("a", true, success(2))));
        writer.flush().await;

        let entries = history.read("a").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name, "A");
        assert_eq!(entries[0].data.fastest_hop, 2.0);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stall_later_writes() {
        let sink = Arc::new(MemorySink::default());
        let history = history(&sink);
        let writer = HistoryWriter::spawn(history.clone());

        writer.log(&result("a", true, success(1)));
        writer.flush().await;

        sink.fail_writes.store(true, Ordering::SeqCst);
        writer.log(&result("a", true, success(2)));
        writer.flush().await;

        sink.fail_writes.store(false, Ordering::SeqCst);
        writer.log(&result("a", true, success(3)));
        writer.flush().await;

        let latencies: Vec<f64> = history
            .read("a")
            .await
            .iter()
            .map(|e| e.data.fastest_hop)
            .collect();
        assert_eq!(latencies, vec![1.0, 3.0]);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
    }
}
