//! HTTP relay.
//! `/api/*` serves JSON built from the poller, the provider and the dashboard store.
//! Every other path is handed to the static front end, with `index.html` as the fallback
//! so client-side routes resolve.

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

use crate::ballast::{BallastBreakdown, compute_ballast, format_ballast};
use crate::laptime::{SectorDeltas, sector_deltas};
use crate::poller::{PollState, Poller};
use crate::provider::HttpSource;
use crate::records::{Dashboard, RaceRecord, RecordsError, SavedDriver};
use crate::source::SourceError;

#[derive(Clone)]
pub struct AppState {
    pub poller: Arc<Poller>,
    /// Present when the relay talks to a real provider; needed for `/api/timing/:circuit`.
    pub provider: Option<Arc<HttpSource>>,
    pub dashboard: Arc<Dashboard>,
    pub circuit: String,
}

pub fn router(state: AppState, static_dir: &FsPath) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/live", get(live))
        .route("/live/refresh", post(refresh))
        .route("/timing/:circuit", get(timing))
        .route("/ballast", get(ballast))
        .route("/sectors", get(sectors))
        .route(
            "/history",
            get(list_history)
                .put(replace_history)
                .post(record_history)
                .delete(clear_history),
        )
        .route("/drivers", get(list_drivers).put(replace_drivers))
        .route("/layout", get(get_layout).put(replace_layout))
        .route("/layout/move", post(move_panel))
        .fallback(api_not_found);

    let spa = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .nest("/api", api)
        .fallback_service(spa)
        .with_state(state)
}

pub async fn serve(bind_addr: &str, static_dir: &FsPath, state: AppState) -> Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", bind_addr))?;

    let poller = Arc::clone(&state.poller);
    let app = router(state, static_dir);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("kartdash relay listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    poller.stop();
    info!("kartdash relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down");
}

// *************** Errors ***************

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    fn upstream(err: SourceError) -> Self {
        warn!("Provider relay failed: {}", err);
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: err.to_string(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        warn!("{err:?}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl From<RecordsError> for ApiError {
    fn from(err: RecordsError) -> Self {
        match err {
            RecordsError::Invalid(message) => Self::bad_request(message),
            RecordsError::Store(err) => Self::internal(err.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResp { error: self.message })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorResp {
    error: String,
}

// *************** Handlers ***************

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "polling": state.poller.is_running(),
        "ts": Utc::now().timestamp_millis(),
    }))
}

async fn api_not_found() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: "unknown API endpoint".to_string(),
    }
}

async fn live(State(state): State<AppState>) -> Json<PollState> {
    Json(state.poller.state())
}

async fn refresh(State(state): State<AppState>) -> StatusCode {
    state.poller.refetch();
    StatusCode::ACCEPTED
}

async fn timing(
    State(state): State<AppState>,
    Path(circuit): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = state
        .provider
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("no timing provider configured"))?;
    let snapshot = provider
        .fetch_circuit(&circuit)
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct BallastQuery {
    driver: f64,
    target: f64,
}

#[derive(Debug, Serialize)]
struct BallastResp {
    #[serde(flatten)]
    breakdown: BallastBreakdown,
    label: String,
}

async fn ballast(Query(query): Query<BallastQuery>) -> Result<Json<BallastResp>, ApiError> {
    for (name, value) in [("driver", query.driver), ("target", query.target)] {
        if !value.is_finite() || value < 0.0 {
            return Err(ApiError::bad_request(format!(
                "{} weight must be a non-negative number",
                name
            )));
        }
    }
    let breakdown = compute_ballast(query.driver, query.target);
    let label = format_ballast(&breakdown);
    Ok(Json(BallastResp { breakdown, label }))
}

async fn sectors(State(state): State<AppState>) -> Json<Vec<SectorDeltas>> {
    let deltas = state
        .poller
        .state()
        .data
        .map(|snapshot| sector_deltas(&snapshot))
        .unwrap_or_default();
    Json(deltas)
}

async fn list_history(State(state): State<AppState>) -> Json<Vec<RaceRecord>> {
    Json(state.dashboard.history())
}

async fn replace_history(
    State(state): State<AppState>,
    Json(races): Json<Vec<RaceRecord>>,
) -> Result<StatusCode, ApiError> {
    state.dashboard.replace_history(&races)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct RecordReq {
    label: Option<String>,
}

/// Saves the current live snapshot as a finished race.
async fn record_history(
    State(state): State<AppState>,
    body: Option<Json<RecordReq>>,
) -> Result<(StatusCode, Json<Vec<RaceRecord>>), ApiError> {
    let label = body.and_then(|Json(req)| req.label);
    let snapshot = state
        .poller
        .state()
        .data
        .ok_or_else(|| ApiError::conflict("no live snapshot to record yet"))?;
    let race = RaceRecord::from_snapshot(&state.circuit, &snapshot, label);
    let races = state.dashboard.record_race(race)?;
    Ok((StatusCode::CREATED, Json(races)))
}

async fn clear_history(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.dashboard.clear_history()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_drivers(State(state): State<AppState>) -> Json<Vec<SavedDriver>> {
    Json(state.dashboard.drivers())
}

async fn replace_drivers(
    State(state): State<AppState>,
    Json(drivers): Json<Vec<SavedDriver>>,
) -> Result<StatusCode, ApiError> {
    state.dashboard.replace_drivers(&drivers)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_layout(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.dashboard.layout())
}

async fn replace_layout(
    State(state): State<AppState>,
    Json(order): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    state.dashboard.replace_layout(&order)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct MoveReq {
    from: usize,
    to: usize,
}

async fn move_panel(
    State(state): State<AppState>,
    Json(req): Json<MoveReq>,
) -> Result<Json<Vec<String>>, ApiError> {
    let order = state.dashboard.move_panel(req.from, req.to)?;
    Ok(Json(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::DEFAULT_LAYOUT;
    use crate::snapshot::{DriverRow, LiveSnapshot, Status};
    use crate::source::SnapshotSource;
    use crate::records::MAX_HISTORY;
    use crate::store::{KvStore, MemoryStore, StoreError};
    use async_trait::async_trait;
    use reqwest::Client;
    use serde_json::{Value, json};
    use std::time::Duration;

    struct FixedSource;

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn fetch(&self) -> Result<LiveSnapshot, SourceError> {
            Ok(LiveSnapshot {
                status: Status::Connected,
                timestamp: 1_700_000_000_000,
                drivers: vec![
                    DriverRow {
                        position: 1,
                        kart: "12".into(),
                        sectors: vec!["20.000".into(), "21.000".into()],
                        ..Default::default()
                    },
                    DriverRow {
                        position: 2,
                        kart: "7".into(),
                        sectors: vec!["20.250".into(), "20.900".into()],
                        ..Default::default()
                    },
                ],
                comments: None,
            })
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    struct TestServer {
        base: String,
        client: Client,
        poller: Arc<Poller>,
        _static_dir: tempfile::TempDir,
    }

    async fn start() -> TestServer {
        start_with(Arc::new(MemoryStore::new())).await
    }

    async fn start_with(store: Arc<dyn KvStore>) -> TestServer {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), "<html>kartdash</html>").unwrap();
        std::fs::write(static_dir.path().join("app.js"), "console.log(1)").unwrap();

        let poller = Arc::new(Poller::spawn(Arc::new(FixedSource), Duration::from_secs(60)));
        let mut rx = poller.subscribe();
        rx.changed().await.unwrap();

        let state = AppState {
            poller: Arc::clone(&poller),
            provider: None,
            dashboard: Arc::new(Dashboard::new(store)),
            circuit: "test-circuit".to_string(),
        };
        let app = router(state, static_dir.path());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            client: Client::new(),
            poller,
            _static_dir: static_dir,
        }
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        async fn get_json(&self, path: &str) -> (u16, Value) {
            let resp = self.client.get(self.url(path)).send().await.unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap())
        }
    }

    #[tokio::test]
    async fn test_health_and_live_state() {
        let server = start().await;
        let (status, body) = server.get_json("/api/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["ok"], true);
        assert_eq!(body["polling"], true);

        let (status, body) = server.get_json("/api/live").await;
        assert_eq!(status, 200);
        assert_eq!(body["loading"], false);
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["data"]["status"], "CONNECTED");
        assert_eq!(body["data"]["drivers"][0]["kart"], "12");
    }

    #[tokio::test]
    async fn test_refresh_triggers_refetch() {
        let server = start().await;
        let mut rx = server.poller.subscribe();
        let resp = server.client.post(server.url("/api/live/refresh")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 202);
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("refetch published")
            .unwrap();
    }

    #[tokio::test]
    async fn test_ballast_endpoint() {
        let server = start().await;
        let (status, body) = server.get_json("/api/ballast?driver=40&target=72.5").await;
        assert_eq!(status, 200);
        assert_eq!(body["total"], 32.5);
        assert_eq!(body["weights"].as_array().unwrap().len(), 3);
        assert_eq!(body["label"], "32.5kg (20×1kg + 10×1kg + 2.5×1kg)");

        let (status, body) = server.get_json("/api/ballast?driver=-5&target=70").await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("driver"));
    }

    #[tokio::test]
    async fn test_sector_deltas_from_live_snapshot() {
        let server = start().await;
        let (status, body) = server.get_json("/api/sectors").await;
        assert_eq!(status, 200);
        assert_eq!(body[0]["kart"], "12");
        assert_eq!(body[0]["deltas_ms"], json!([0, 100]));
        assert_eq!(body[1]["deltas_ms"], json!([250, 0]));
    }

    #[tokio::test]
    async fn test_history_record_and_clear() {
        let server = start().await;
        let resp = server
            .client
            .post(server.url("/api/history"))
            .json(&json!({ "label": "Heat 1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 201);

        let (_, body) = server.get_json("/api/history").await;
        assert_eq!(body[0]["circuit"], "test-circuit");
        assert_eq!(body[0]["label"], "Heat 1");
        assert_eq!(body[0]["drivers"].as_array().unwrap().len(), 2);

        let resp = server.client.delete(server.url("/api/history")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        let (_, body) = server.get_json("/api/history").await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_drivers_and_layout() {
        let server = start().await;
        let resp = server
            .client
            .put(server.url("/api/drivers"))
            .json(&json!([{ "name": "Ana", "weight": 61.5 }]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        let (_, body) = server.get_json("/api/drivers").await;
        assert_eq!(body[0]["name"], "Ana");
        assert_eq!(body[0]["kart"], Value::Null);

        let (_, body) = server.get_json("/api/layout").await;
        assert_eq!(body, json!(DEFAULT_LAYOUT));

        let resp = server
            .client
            .post(server.url("/api/layout/move"))
            .json(&json!({ "from": 4, "to": 0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body[0], "history");

        let resp = server
            .client
            .post(server.url("/api/layout/move"))
            .json(&json!({ "from": 0, "to": 42 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_history_put_dedupes_and_caps() {
        let server = start().await;
        let mut races: Vec<Value> = (0..MAX_HISTORY + 5)
            .map(|n| json!({ "id": format!("r{}", n), "circuit": "c", "recorded_at": n, "drivers": [] }))
            .collect();
        races.push(json!({ "id": "r10", "circuit": "c", "recorded_at": 99, "drivers": [] }));

        let resp = server
            .client
            .put(server.url("/api/history"))
            .json(&races)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);

        let (_, body) = server.get_json("/api/history").await;
        let stored = body.as_array().unwrap();
        assert_eq!(stored.len(), MAX_HISTORY);
        assert_eq!(stored.iter().filter(|r| r["id"] == "r10").count(), 1);
        assert_eq!(stored[MAX_HISTORY - 1]["recorded_at"], 99);
    }

    /// Reads work, every write fails like a full disk.
    struct ReadOnlyStore;

    impl KvStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        fn put(&self, key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io {
                key: key.to_string(),
                source: std::io::Error::other("disk full"),
            })
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.put(key, "")
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_server_errors() {
        let server = start_with(Arc::new(ReadOnlyStore)).await;

        let resp = server
            .client
            .put(server.url("/api/drivers"))
            .json(&json!([{ "name": "Ana", "weight": 61.5 }]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 500);

        let resp = server
            .client
            .post(server.url("/api/layout/move"))
            .json(&json!({ "from": 0, "to": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 500);

        // Validation still wins over the store
        let resp = server
            .client
            .put(server.url("/api/layout"))
            .json(&json!(["a", "a"]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_timing_without_provider_is_unavailable() {
        let server = start().await;
        let (status, _) = server.get_json("/api/timing/lyon").await;
        assert_eq!(status, 503);
    }

    #[tokio::test]
    async fn test_unknown_api_path_is_json_404() {
        let server = start().await;
        let (status, body) = server.get_json("/api/nope").await;
        assert_eq!(status, 404);
        assert_eq!(body["error"], "unknown API endpoint");
    }

    #[tokio::test]
    async fn test_spa_fallback() {
        let server = start().await;
        let resp = server.client.get(server.url("/app.js")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "console.log(1)");

        let resp = server.client.get(server.url("/race/42")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await.unwrap(), "<html>kartdash</html>");
    }
}
