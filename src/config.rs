//! Configuration module for hopwatch.
//!
//! Loads configuration from environment variables with sensible defaults,
//! and holds the settings that can be changed while running.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::db::{DbError, RecordSink};

/// Sink key holding persisted [`Settings`].
pub const SETTINGS_KEY: &str = "settings";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 3055)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "hopwatch.db")
    pub db_path: String,
    /// Traceroute binary to run (default: "traceroute")
    pub traceroute_bin: String,
    /// Hard limit for a single probe (default: 45s)
    pub probe_timeout: Duration,
    /// Number of probes a sweep runs at once (default: 20)
    pub probe_concurrency: usize,
    /// Lifetime of the cached history log (default: 15s)
    pub cache_ttl: Duration,
    /// Relative mean-latency change reported as drift (default: 0.2)
    pub latency_change_ratio: f64,
    /// Initial values for the runtime settings
    pub settings: Settings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 3055,
            db_path: "hopwatch.db".to_string(),
            traceroute_bin: "traceroute".to_string(),
            probe_timeout: Duration::from_secs(45),
            probe_concurrency: 20,
            cache_ttl: Duration::from_secs(15),
            latency_change_ratio: 0.2,
            settings: Settings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HOPWATCH_HTTP_PORT`: HTTP port (default: 3055)
    /// - `HOPWATCH_DB_PATH`: Database file path (default: "hopwatch.db")
    /// - `HOPWATCH_TRACEROUTE_BIN`: Probe binary (default: "traceroute")
    /// - `HOPWATCH_PROBE_TIMEOUT`: Seconds per probe (default: 45)
    /// - `HOPWATCH_PROBE_CONCURRENCY`: Parallel probes per sweep (default: 20)
    /// - `HOPWATCH_CACHE_TTL`: History cache lifetime in seconds (default: 15)
    /// - `HOPWATCH_LATENCY_CHANGE_RATIO`: Latency drift tolerance (default: 0.2)
    /// - `HOPWATCH_SLOW_HOP_THRESHOLD`: Slow hop threshold in ms (default: 25)
    /// - `HOPWATCH_REFRESH_INTERVAL`: Seconds between sweeps, 0 disables (default: 60)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env_parse("HOPWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(db_path) = env::var("HOPWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Ok(bin) = env::var("HOPWATCH_TRACEROUTE_BIN") {
            cfg.traceroute_bin = bin;
        }
        if let Some(secs) = env_parse::<u64>("HOPWATCH_PROBE_TIMEOUT").filter(|s| *s > 0) {
            cfg.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("HOPWATCH_PROBE_CONCURRENCY").filter(|n| *n > 0) {
            cfg.probe_concurrency = n;
        }
        if let Some(secs) = env_parse("HOPWATCH_CACHE_TTL") {
            cfg.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ratio) = env_parse::<f64>("HOPWATCH_LATENCY_CHANGE_RATIO").filter(|r| *r >= 0.0) {
            cfg.latency_change_ratio = ratio;
        }
        if let Some(threshold) = env_parse::<f64>("HOPWATCH_SLOW_HOP_THRESHOLD").filter(|t| *t > 0.0) {
            cfg.settings.slow_hop_threshold = threshold;
        }
        if let Some(secs) = env_parse("HOPWATCH_REFRESH_INTERVAL") {
            cfg.settings.refresh_interval = secs;
        }

        cfg
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Settings error types.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(String),
    #[error("settings sink error: {0}")]
    Sink(#[from] DbError),
    #[error("settings encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Settings adjustable at runtime through the API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Hops slower than this many milliseconds count as slow
    pub slow_hop_threshold: f64,
    /// Seconds between background sweeps; 0 disables them
    pub refresh_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            slow_hop_threshold: 25.0,
            refresh_interval: 60,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.slow_hop_threshold.is_finite() || self.slow_hop_threshold <= 0.0 {
            return Err(SettingsError::Invalid(
                "slowHopThreshold must be a positive number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared handle to the current settings, persisted through a record sink.
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Settings>>,
    sink: Arc<dyn RecordSink>,
}

impl SettingsHandle {
    pub fn new(defaults: Settings, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            current: Arc::new(RwLock::new(defaults)),
            sink,
        }
    }

    /// Replace the defaults with previously saved settings, if any.
    pub async fn load(&self) {
        let saved = match self.sink.read_all(SETTINGS_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Settings: failed to read saved settings: {}", e);
                return;
            }
        };

        match serde_json::from_slice::<Settings>(&saved) {
            Ok(settings) if settings.validate().is_ok() => {
                *self.current.write().await = settings;
            }
            Ok(_) => tracing::warn!("Settings: ignoring invalid saved settings"),
            Err(e) => tracing::warn!("Settings: ignoring malformed saved settings: {}", e),
        }
    }

    pub async fn get(&self) -> Settings {
        *self.current.read().await
    }

    /// Validate, persist and apply new settings.
    pub async fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        let bytes = serde_json::to_vec(&settings)?;
        self.sink.write_all(SETTINGS_KEY, &bytes).await?;
        *self.current.write().await = settings;
        Ok(())
    }
}
