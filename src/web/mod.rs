//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::{ServerConfig, SettingsHandle};
use crate::db::{HistoryStore, Store};
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub history: Arc<HistoryStore>,
    pub settings: SettingsHandle,
}

/// Web server for hopwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        settings: SettingsHandle,
    ) -> Self {
        let history = scheduler.history().clone();
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                history,
                settings,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        routes(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        // Targets
        .route(
            "/api/targets",
            get(handlers::handle_get_targets).post(handlers::handle_create_target),
        )
        .route(
            "/api/targets/{id}",
            put(handlers::handle_update_target).delete(handlers::handle_delete_target),
        )
        // Settings
        .route(
            "/api/settings",
            get(handlers::handle_get_settings).post(handlers::handle_update_settings),
        )
        // Probes
        .route("/api/traceroute/single", post(handlers::handle_traceroute_single))
        .route("/api/traceroute/all", post(handlers::handle_traceroute_all))
        // History
        .route("/api/history/targets", get(handlers::handle_history_targets))
        .route(
            "/api/history/charts/{target}/{granularity}",
            get(handlers::handle_history_chart),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}
