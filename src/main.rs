//! hopwatch - network path monitoring service
//!
//! Traces the route to a list of targets, keeps a week of results for the
//! highlighted ones and serves drift and trend views over a JSON API.

mod analysis;
mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use analysis::DriftConfig;
use config::{ServerConfig, SettingsHandle};
use db::{HistoryStore, Store};
use probe::TracerouteRunner;
use scheduler::{ProbeOptions, Scheduler};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("hopwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting hopwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let history = Arc::new(HistoryStore::new(store.clone(), cfg.cache_ttl));
    let settings = SettingsHandle::new(cfg.settings, store.clone());
    settings.load().await;

    let options = ProbeOptions {
        timeout: cfg.probe_timeout,
        concurrency: cfg.probe_concurrency,
        drift: DriftConfig {
            latency_change_ratio: cfg.latency_change_ratio,
            ..Default::default()
        },
    };
    let runner = Arc::new(TracerouteRunner::new(&cfg.traceroute_bin));

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        history,
        runner,
        settings.clone(),
        options,
    ));
    scheduler.start().await;

    // Start web server
    let server = Server::new(cfg, store, scheduler.clone(), settings);
    let served = server.start().await;

    scheduler.writer().flush().await;
    served
}
