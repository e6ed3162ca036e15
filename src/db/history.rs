//! Time-pruned history log of highlighted probe results.
//!
//! The whole log is persisted as one JSON record in a [`RecordSink`] and
//! read through a short-lived cache. Every write appends one entry, drops
//! everything older than the retention window and replaces the record.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use super::models::{HistoryEntry, RetainedTarget};
use super::store::{DbError, RecordSink};

/// Sink key holding the serialized log.
pub const HISTORY_KEY: &str = "traceroute_history";

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// History error types.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history sink error: {0}")]
    Sink(#[from] DbError),
    #[error("malformed history log: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result of loading the persisted log for readers.
///
/// `Recovered` presents to readers exactly like `Empty`; it only exists so
/// the failure can be logged. Writers never go through a snapshot.
enum Snapshot {
    Empty,
    Loaded(Arc<Vec<HistoryEntry>>),
    Recovered(HistoryError),
}

/// The retained history log with a read-through cache in front of the sink.
pub struct HistoryStore {
    sink: Arc<dyn RecordSink>,
    cache: Cache<String, Arc<Vec<HistoryEntry>>>,
    /// Bumped by every write. A read only fills the cache if no write
    /// landed while it was fetching.
    generation: Mutex<u64>,
    key: String,
    retention: ChronoDuration,
}

impl HistoryStore {
    /// Create a store over `sink` whose cached log expires after `cache_ttl`.
    pub fn new(sink: Arc<dyn RecordSink>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(cache_ttl)
            .build();

        Self {
            sink,
            cache,
            generation: Mutex::new(0),
            key: HISTORY_KEY.to_string(),
            retention: ChronoDuration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    pub fn with_retention(mut self, retention: ChronoDuration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> ChronoDuration {
        self.retention
    }

    /// All retained entries for `target`, oldest first.
    pub async fn read(&self, target: &str) -> Vec<HistoryEntry> {
        self.log()
            .await
            .iter()
            .filter(|e| e.target == target)
            .cloned()
            .collect()
    }

    /// All retained entries across targets, oldest first.
    pub async fn read_all(&self) -> Vec<HistoryEntry> {
        self.log().await.as_ref().clone()
    }

    /// Targets present in the retained log, distinct by target string, in
    /// the order they first appear. The first display name seen wins.
    pub async fn retained_targets(&self) -> Vec<RetainedTarget> {
        let log = self.log().await;
        let mut targets: Vec<RetainedTarget> = Vec::new();
        for entry in log.iter() {
            if !targets.iter().any(|t| t.target == entry.target) {
                targets.push(RetainedTarget {
                    target: entry.target.clone(),
                    display_name: entry.display_name.clone(),
                });
            }
        }
        targets
    }

    /// Append `entry`, prune everything older than `now - retention` and
    /// persist the log. Returns the number of retained entries.
    ///
    /// The log is always read from the sink, never the cache. A log that
    /// cannot be read fails the append and is left untouched; a log that
    /// reads but does not parse is replaced.
    ///
    /// The cache holds the new log once this returns `Ok`; after a failed
    /// write it holds nothing.
    pub async fn append_and_prune(
        &self,
        entry: HistoryEntry,
        now: DateTime<Utc>,
    ) -> Result<usize, HistoryError> {
        let mut log = match self.fetch().await {
            Ok(found) => found.unwrap_or_default(),
            Err(HistoryError::Malformed(e)) => {
                tracing::warn!("History: replacing malformed log: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        append_entry(&mut log, entry);
        prune(&mut log, now - self.retention);

        let written = match serde_json::to_vec_pretty(&log) {
            Ok(bytes) => self
                .sink
                .write_all(&self.key, &bytes)
                .await
                .map_err(HistoryError::from),
            Err(e) => Err(e.into()),
        };

        let mut generation = self.generation.lock().await;
        *generation += 1;

        match written {
            Ok(()) => {
                let retained = log.len();
                self.cache.insert(self.key.clone(), Arc::new(log)).await;
                Ok(retained)
            }
            Err(e) => {
                self.cache.invalidate(&self.key).await;
                Err(e)
            }
        }
    }

    async fn log(&self) -> Arc<Vec<HistoryEntry>> {
        match self.load().await {
            Snapshot::Empty => Arc::default(),
            Snapshot::Loaded(log) => log,
            Snapshot::Recovered(e) => {
                tracing::warn!("History: treating unreadable log as empty: {}", e);
                Arc::default()
            }
        }
    }

    async fn load(&self) -> Snapshot {
        if let Some(log) = self.cache.get(&self.key).await {
            return Snapshot::Loaded(log);
        }

        let generation = *self.generation.lock().await;
        match self.fetch().await {
            Ok(Some(log)) => {
                let log = Arc::new(log);
                self.fill(generation, log.clone()).await;
                Snapshot::Loaded(log)
            }
            Ok(None) => {
                self.fill(generation, Arc::default()).await;
                Snapshot::Empty
            }
            // Not cached, so the next read retries the sink.
            Err(e) => Snapshot::Recovered(e),
        }
    }

    /// Cache `log`, fetched at `generation`, unless a write has landed since.
    async fn fill(&self, generation: u64, log: Arc<Vec<HistoryEntry>>) {
        let current = self.generation.lock().await;
        if *current == generation {
            self.cache.insert(self.key.clone(), log).await;
        }
    }

    async fn fetch(&self) -> Result<Option<Vec<HistoryEntry>>, HistoryError> {
        if !self.sink.exists(&self.key).await? {
            return Ok(None);
        }
        let bytes = match self.sink.read_all(&self.key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Push `entry` unless the identical entry is already present.
fn append_entry(log: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    if !log.contains(&entry) {
        log.push(entry);
    }
}

/// Drop entries older than `cutoff`.
pub fn prune(log: &mut Vec<HistoryEntry>, cutoff: DateTime<Utc>) {
    log.retain(|e| e.timestamp >= cutoff);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory sink with switchable failures, for tests.
    #[derive(Default)]
    pub struct MemorySink {
        records: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
        pub reads: AtomicUsize,
        pub writes: AtomicUsize,
    }

    impl MemorySink {
        pub fn put(&self, key: &str, data: &[u8]) {
            self.records.lock().unwrap().insert(key.to_string(), data.to_vec());
        }

        pub fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.records.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl RecordSink for MemorySink {
        async fn exists(&self, key: &str) -> Result<bool, DbError> {
            Ok(self.records.lock().unwrap().contains_key(key))
        }

        async fn read_all(&self, key: &str) -> Result<Option<Vec<u8>>, DbError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(DbError::Unavailable("read failed".to_string()));
            }
            Ok(self.get(key))
        }

        async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), DbError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(DbError::Unavailable("write failed".to_string()));
            }
            self.put(key, data);
            Ok(())
        }
    }
}
