//! HTTP request handlers.

use super::AppState;
use crate::analysis::{bucketed_trends, Granularity, TrendError};
use crate::config::{Settings, SettingsError};
use crate::db::{validate_target, DbError, Target};
use crate::scheduler::ProbeRequest;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.to_string() })),
    )
        .into_response()
}

fn db_error_response(e: DbError) -> Response {
    let status = match &e {
        DbError::Validation(_) => StatusCode::BAD_REQUEST,
        DbError::Duplicate(_) => StatusCode::CONFLICT,
        DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Target store error: {}", e);
    }
    error_response(status, e)
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> Response {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
    pub display_name: String,
    pub target: String,
    #[serde(default)]
    pub is_highlighted: bool,
}

impl TargetRequest {
    fn into_target(self) -> Target {
        Target::new(self.display_name.trim(), self.target.trim(), self.is_highlighted)
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<TargetRequest>,
) -> Response {
    let target = req.into_target();

    match state.store.add_target(&target) {
        Ok(()) => {
            tracing::info!("Added target {} ({})", target.target, target.display_name);
            (StatusCode::CREATED, Json(target)).into_response()
        }
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TargetRequest>,
) -> Response {
    match state.store.update_target(&id, &req.into_target()) {
        Ok(updated) => {
            if updated.id != id {
                tracing::info!("Target {} renamed to {}", id, updated.id);
            }
            Json(updated).into_response()
        }
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_target(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// API: Settings
// ============================================================================

pub async fn handle_get_settings(State(state): State<AppState>) -> Response {
    Json(state.settings.get().await).into_response()
}

pub async fn handle_update_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Response {
    let previous = state.settings.get().await;
    match state.settings.update(settings).await {
        Ok(()) => {}
        Err(e @ SettingsError::Invalid(_)) => return error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            tracing::error!("Failed to save settings: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    }

    if previous.refresh_interval != settings.refresh_interval {
        state.scheduler.reschedule(settings.refresh_interval).await;
    }

    Json(settings).into_response()
}

// ============================================================================
// API: Probes
// ============================================================================

pub async fn handle_traceroute_single(
    State(state): State<AppState>,
    Json(mut req): Json<ProbeRequest>,
) -> Response {
    req.target = req.target.trim().to_string();
    if req.display_name.trim().is_empty() {
        req.display_name = req.target.clone();
    }
    if let Err(e) = validate_target(&req.display_name, &req.target) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }

    let result = state.scheduler.run_probe(req).await;
    let status = if result.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result)).into_response()
}

pub async fn handle_traceroute_all(State(state): State<AppState>) -> Response {
    Json(state.scheduler.sweep_all().await).into_response()
}

// ============================================================================
// API: History
// ============================================================================

pub async fn handle_history_targets(State(state): State<AppState>) -> Response {
    Json(state.history.retained_targets().await).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartResponse {
    pub success: bool,
    pub target: String,
    pub display_name: String,
    pub granularity: Granularity,
    pub title: String,
    pub series: crate::db::BucketedSeries,
}

pub async fn handle_history_chart(
    State(state): State<AppState>,
    Path((target, granularity)): Path<(String, String)>,
) -> Response {
    let report = match granularity.parse::<Granularity>() {
        Ok(g) => bucketed_trends(&state.history, &target, g, Utc::now(), &Local).await,
        Err(e) => Err(e),
    };
    let report = match report {
        Ok(report) => report,
        Err(e @ TrendError::UnknownGranularity(_)) => {
            return error_response(StatusCode::BAD_REQUEST, e)
        }
        Err(e @ TrendError::InsufficientHistory { .. }) => {
            return error_response(StatusCode::NOT_FOUND, e)
        }
    };
    let granularity = report.granularity;

    let title = match granularity {
        Granularity::Hourly => format!("Hourly averages (24h) - {}", report.display_name),
        Granularity::Daily => format!("Daily metrics (7d) - {}", report.display_name),
    };

    Json(ChartResponse {
        success: true,
        target: report.target,
        display_name: report.display_name,
        granularity: report.granularity,
        title,
        series: report.series,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, SettingsHandle};
    use crate::db::testing::MemorySink;
    use crate::db::{HistoryEntry, HistoryStore, Hop, Measurement, Store};
    use crate::probe::{ProbeError, ProbeRunner};
    use crate::scheduler::{ProbeOptions, Scheduler};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use axum::Router;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    const OUTPUT: &str = " 1  gw (192.168.1.1)  1.5 ms\n 2  isp (10.1.1.1)  40.0 ms\n";

    /// Traces successfully unless the target starts with "bad".
    struct FixedRunner;

    #[async_trait]
    impl ProbeRunner for FixedRunner {
        async fn run(&self, target: &str) -> Result<String, ProbeError> {
            if target.starts_with("bad") {
                Err(ProbeError::UnknownHost(target.to_string()))
            } else {
                Ok(OUTPUT.to_string())
            }
        }
    }

    fn app() -> (Router, AppState, NamedTempFile) {
        let db = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(db.path()).unwrap());
        let sink = Arc::new(MemorySink::default());
        let history = Arc::new(HistoryStore::new(sink.clone(), Duration::from_secs(15)));
        let settings = SettingsHandle::new(Settings::default(), sink);
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            history.clone(),
            Arc::new(FixedRunner),
            settings.clone(),
            ProbeOptions::default(),
        ));
        let state = AppState {
            config: ServerConfig::default(),
            store,
            scheduler,
            history,
            settings,
        };
        (crate::web::routes(state.clone()), state, db)
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn entry(target: &str, hours_ago: i64, latency: f64) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now() - ChronoDuration::hours(hours_ago),
            target: target.to_string(),
            display_name: "Example".to_string(),
            data: Measurement {
                total_hops: 1,
                fastest_hop: latency,
                slowest_hop: latency,
                slow_hops_count: 0,
                detailed_hops: vec![Hop {
                    hop: 1,
                    ip: "10.0.0.1".to_string(),
                    latency,
                    is_slow: false,
                }],
            },
        }
    }

    #[tokio::test]
    async fn test_target_crud() {
        let (router, _state, _db) = app();
        let body = json!({ "displayName": "Example", "target": "example.com", "isHighlighted": true });

        let (status, created) = send(&router, Method::POST, "/api/targets", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], "example.com");
        assert_eq!(created["isHighlighted"], true);

        let (status, _) = send(&router, Method::POST, "/api/targets", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, err) = send(
            &router,
            Method::POST,
            "/api/targets",
            Some(json!({ "displayName": "", "target": "x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["success"], false);

        let (status, updated) = send(
            &router,
            Method::PUT,
            "/api/targets/example.com",
            Some(json!({ "displayName": "Renamed", "target": "example.org" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["id"], "example.org");

        let (status, _) = send(
            &router,
            Method::PUT,
            "/api/targets/missing.com",
            Some(json!({ "displayName": "M", "target": "missing.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, list) = send(&router, Method::GET, "/api/targets", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["displayName"], "Renamed");

        let (status, _) = send(&router, Method::DELETE, "/api/targets/example.org", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&router, Method::DELETE, "/api/targets/example.org", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let (router, state, _db) = app();

        let (status, current) = send(&router, Method::GET, "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(current["slowHopThreshold"], 25.0);
        assert_eq!(current["refreshInterval"], 60);

        let (status, err) = send(
            &router,
            Method::POST,
            "/api/settings",
            Some(json!({ "slowHopThreshold": -1.0, "refreshInterval": 60 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["error"].as_str().unwrap().starts_with("invalid settings"));
        assert_eq!(state.settings.get().await, Settings::default());

        let (status, _) = send(
            &router,
            Method::POST,
            "/api/settings",
            Some(json!({ "slowHopThreshold": 50.0, "refreshInterval": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.settings.get().await,
            Settings { slow_hop_threshold: 50.0, refresh_interval: 0 }
        );
    }

    #[tokio::test]
    async fn test_single_traceroute() {
        let (router, state, _db) = app();

        let (status, result) = send(
            &router,
            Method::POST,
            "/api/traceroute/single",
            Some(json!({ "target": "example.com", "isHighlighted": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["success"], true);
        assert_eq!(result["displayName"], "example.com");
        assert_eq!(result["data"]["totalHops"], 2);
        assert_eq!(result["data"]["slowHopsCount"], 1);
        assert_eq!(result["analysis"]["routeChanged"], false);

        state.scheduler.writer().flush().await;
        assert_eq!(state.history.read("example.com").await.len(), 1);

        let (status, result) = send(
            &router,
            Method::POST,
            "/api/traceroute/single",
            Some(json!({ "target": "bad.invalid" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(result["success"], false);
        assert_eq!(result["errorKind"], "unknown_host");

        let (status, _) = send(
            &router,
            Method::POST,
            "/api/traceroute/single",
            Some(json!({ "target": "-n example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_traceroute_all_covers_targets_in_order() {
        let (router, state, _db) = app();
        state.store.add_target(&Target::new("One", "one.example", false)).unwrap();
        state.store.add_target(&Target::new("Two", "bad.example", false)).unwrap();

        let (status, results) = send(&router, Method::POST, "/api/traceroute/all", None).await;
        assert_eq!(status, StatusCode::OK);
        let results = results.as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["target"], "one.example");
        assert_eq!(results[0]["success"], true);
        assert_eq!(results[1]["success"], false);
    }

    #[tokio::test]
    async fn test_history_charts() {
        let (router, state, _db) = app();
        let now = Utc::now();
        state.history.append_and_prune(entry("example.com", 2, 10.0), now).await.unwrap();

        let (status, err) = send(&router, Method::GET, "/api/history/charts/example.com/hourly", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["success"], false);

        state.history.append_and_prune(entry("example.com", 1, 20.0), now).await.unwrap();

        let (status, chart) = send(&router, Method::GET, "/api/history/charts/example.com/hourly", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chart["success"], true);
        assert_eq!(chart["title"], "Hourly averages (24h) - Example");
        assert_eq!(chart["series"]["labels"].as_array().unwrap().len(), 24);

        let (status, chart) = send(&router, Method::GET, "/api/history/charts/example.com/daily", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chart["granularity"], "daily");
        assert_eq!(chart["title"], "Daily metrics (7d) - Example");

        let (status, err) = send(&router, Method::GET, "/api/history/charts/example.com/weekly", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "unknown granularity: weekly");

        let (_, targets) = send(&router, Method::GET, "/api/history/targets", None).await;
        assert_eq!(targets, json!([{ "target": "example.com", "displayName": "Example" }]));
    }
}
