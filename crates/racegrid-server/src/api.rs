//! HTTP API route handlers for the orchestrator.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use racegrid::error::GridError;
use racegrid::orchestrator::Orchestrator;
use racegrid::types::{
    GarageEntry, LeaderboardPosition, MatchmakingTicket, Motorcycle, PlayerDetails, RaceResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Registry the grid metrics were registered in.
    pub metrics_registry: prometheus::Registry,
}

/// Health check response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotorcycleRequest {
    pub motorcycle_id: i32,
}

/// Create the HTTP router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        // Accounts
        .route("/register", post(register))
        .route("/login", post(login))
        // Leaderboard
        .route("/leaderboard", get(leaderboard))
        .route("/players/:username", get(player))
        // Garage
        .route("/players/:username/money", get(money))
        .route("/players/:username/garage", get(garage))
        .route("/players/:username/shop", get(shop))
        .route("/players/:username/buy", post(buy))
        .route("/players/:username/upgrade", post(upgrade))
        // Racing
        .route("/players/:username/race", post(race))
        .route("/players/:username/history", get(history))
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Prometheus text exposition of the grid metrics.
async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&state.metrics_registry.gather(), &mut buf)
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buf))
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(details): Json<PlayerDetails>,
) -> Result<Json<OkResponse>, AppError> {
    let ok = state.orchestrator.register_player(&details).await?;
    Ok(Json(OkResponse { ok }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<OkResponse>, AppError> {
    let ok = state.orchestrator.login(&req.username, &req.password).await?;
    Ok(Json(OkResponse { ok }))
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LeaderboardPosition>>, AppError> {
    Ok(Json(state.orchestrator.leaderboard().await?))
}

async fn player(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<LeaderboardPosition>, AppError> {
    Ok(Json(state.orchestrator.player(&username).await?))
}

async fn money(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<i64>, AppError> {
    Ok(Json(state.orchestrator.money(&username).await?))
}

async fn garage(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<Vec<GarageEntry>>, AppError> {
    Ok(Json(state.orchestrator.garage(&username).await?))
}

async fn shop(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<Vec<Motorcycle>>, AppError> {
    Ok(Json(state.orchestrator.shop(&username).await?))
}

async fn buy(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<MotorcycleRequest>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.buy(&username, req.motorcycle_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upgrade(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<MotorcycleRequest>,
) -> Result<StatusCode, AppError> {
    state
        .orchestrator
        .upgrade(&username, req.motorcycle_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn race(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<MotorcycleRequest>,
) -> Result<Json<MatchmakingTicket>, AppError> {
    tracing::info!(%username, motorcycle_id = req.motorcycle_id, "race requested");
    Ok(Json(
        state
            .orchestrator
            .start_race(&username, req.motorcycle_id)
            .await?,
    ))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<Vec<RaceResult>>, AppError> {
    Ok(Json(state.orchestrator.history(&username).await?))
}

/// Handler error, rendered as `{"error": "..."}`.
pub enum AppError {
    Grid(GridError),
    Internal(anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        let AppError::Grid(err) = self else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match err {
            GridError::ServiceUnavailable { .. }
            | GridError::ReplicaUnavailable { .. }
            | GridError::Registration { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GridError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            GridError::NotFound { .. } => StatusCode::NOT_FOUND,
            GridError::TrackFull { .. }
            | GridError::AlreadyRacing { .. }
            | GridError::InsufficientFunds { .. } => StatusCode::CONFLICT,
            GridError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GridError::Rpc { source, .. } => match source.code() {
                tonic::Code::InvalidArgument => StatusCode::BAD_REQUEST,
                tonic::Code::NotFound => StatusCode::NOT_FOUND,
                tonic::Code::AlreadyExists | tonic::Code::FailedPrecondition => {
                    StatusCode::CONFLICT
                }
                tonic::Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                tonic::Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            GridError::PersistenceError { .. } | GridError::InvalidConfig { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self {
            AppError::Grid(err) => err.to_string(),
            AppError::Internal(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::warn!(%status, error = %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<GridError> for AppError {
    fn from(err: GridError) -> Self {
        Self::Grid(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use racegrid::config::GridConfig;
    use racegrid::matchmaking::RaceEngine;
    use racegrid::metrics::GridMetrics;
    use racegrid::service::ServiceHandle;
    use racegrid::services::{MemoryAuth, MemoryGarage, MemoryLeaderboard, RacingNode};
    use racegrid::storage::memory_race::MemoryRaceStore;
    use racegrid::testing::{FakeConnector, RecordingNotifier};
    use racegrid::types::{ServiceKind, Track, TrackId};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Router over an orchestrator whose replicas live in this process.
    fn app(with_replicas: bool) -> Router {
        let config = GridConfig {
            tracks: vec![Track::new(1, "Mugello", 2)],
            ..Default::default()
        };
        let metrics_registry = prometheus::Registry::new();
        let metrics = Arc::new(GridMetrics::new(&metrics_registry).unwrap());
        let orchestrator = Arc::new(
            Orchestrator::new(&config, Arc::new(FakeConnector::new()), metrics.clone()).unwrap(),
        );
        if with_replicas {
            let registry = orchestrator.registry();
            registry.register(ServiceHandle::Auth(Arc::new(MemoryAuth::new())));
            registry.register(ServiceHandle::Garage(Arc::new(MemoryGarage::new())));
            registry.register(ServiceHandle::Leaderboard(Arc::new(MemoryLeaderboard::new())));
            let engine = RaceEngine::new(
                Arc::new(MemoryRaceStore::new(config.tracks.clone())),
                config.matchmaking_timeout,
                metrics,
            );
            registry.register(ServiceHandle::Racing(Arc::new(RacingNode::new(
                engine,
                Arc::new(RecordingNotifier::new()),
            ))));
        }
        create_router(Arc::new(AppState {
            orchestrator,
            metrics_registry,
        }))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn json_of(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn sign_up(app: &Router, username: &str) {
        let (status, body) = json_of(
            app,
            Method::POST,
            "/register",
            Some(json!({
                "username": username,
                "password": "pw",
                "email": format!("{username}@example.com"),
                "phone": "555-0100",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (status, body) = json_of(&app(false), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_are_exposed_as_text() {
        let (status, body) = send(&app(true), Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("racegrid_races_completed_total"));
    }

    #[tokio::test]
    async fn register_and_login() {
        let app = app(true);
        sign_up(&app, "vale").await;

        let (status, body) = json_of(
            &app,
            Method::POST,
            "/register",
            Some(json!({ "username": "vale", "password": "x", "email": "", "phone": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": false }));

        let (_, body) = json_of(
            &app,
            Method::POST,
            "/login",
            Some(json!({ "username": "vale", "password": "pw" })),
        )
        .await;
        assert_eq!(body, json!({ "ok": true }));
        let (_, body) = json_of(
            &app,
            Method::POST,
            "/login",
            Some(json!({ "username": "vale", "password": "nope" })),
        )
        .await;
        assert_eq!(body, json!({ "ok": false }));
    }

    #[tokio::test]
    async fn garage_routes_track_money_and_ownership() {
        let app = app(true);
        sign_up(&app, "vale").await;

        let (status, money) = json_of(&app, Method::GET, "/players/vale/money", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(money, json!(2000));

        let (status, shop) = json_of(&app, Method::GET, "/players/vale/shop", None).await;
        assert_eq!(status, StatusCode::OK);
        let for_sale = shop.as_array().unwrap().len();
        assert!(for_sale > 1);

        let (status, _) = send(
            &app,
            Method::POST,
            "/players/vale/buy",
            Some(json!({ "motorcycle_id": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(
            &app,
            Method::POST,
            "/players/vale/upgrade",
            Some(json!({ "motorcycle_id": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, garage) = json_of(&app, Method::GET, "/players/vale/garage", None).await;
        let garage: Vec<GarageEntry> = serde_json::from_value(garage).unwrap();
        assert_eq!(garage.len(), 1);
        assert_eq!(garage[0].ownership.motorcycle.id, 1);
        assert_eq!(garage[0].ownership.level, 2);
        assert_eq!(garage[0].racing_on, None);

        let (_, shop) = json_of(&app, Method::GET, "/players/vale/shop", None).await;
        assert_eq!(shop.as_array().unwrap().len(), for_sale - 1);
        let (_, money) = json_of(&app, Method::GET, "/players/vale/money", None).await;
        assert!(money.as_i64().unwrap() < 1600);
    }

    #[tokio::test]
    async fn race_routes_fill_a_track_and_record_history() {
        let app = app(true);
        for name in ["vale", "marc"] {
            sign_up(&app, name).await;
            let (status, _) = send(
                &app,
                Method::POST,
                &format!("/players/{name}/buy"),
                Some(json!({ "motorcycle_id": 1 })),
            )
            .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }

        let (status, ticket) = json_of(
            &app,
            Method::POST,
            "/players/vale/race",
            Some(json!({ "motorcycle_id": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ticket: MatchmakingTicket = serde_json::from_value(ticket).unwrap();
        assert_eq!(ticket.track_id, TrackId(1));
        assert_eq!(ticket.slots_left, 1);

        // Same rider on the same motorcycle again.
        let (status, body) = json_of(
            &app,
            Method::POST,
            "/players/vale/race",
            Some(json!({ "motorcycle_id": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already racing"));

        let (_, ticket) = json_of(
            &app,
            Method::POST,
            "/players/marc/race",
            Some(json!({ "motorcycle_id": 1 })),
        )
        .await;
        assert_eq!(ticket["slots_left"], 0);

        let (status, history) = json_of(&app, Method::GET, "/players/vale/history", None).await;
        assert_eq!(status, StatusCode::OK);
        let history: Vec<RaceResult> = serde_json::from_value(history).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].total, 2);
        assert_eq!(history[0].track_name, "Mugello");
    }

    #[tokio::test]
    async fn leaderboard_routes_list_players() {
        let app = app(true);
        sign_up(&app, "vale").await;
        sign_up(&app, "marc").await;

        let (status, board) = json_of(&app, Method::GET, "/leaderboard", None).await;
        assert_eq!(status, StatusCode::OK);
        let board: Vec<LeaderboardPosition> = serde_json::from_value(board).unwrap();
        assert_eq!(board.len(), 2);
        assert!(board.iter().all(|p| p.points == 0));

        let (status, player) = json_of(&app, Method::GET, "/players/vale", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(player["username"], "vale");
    }

    #[tokio::test]
    async fn unknown_player_is_404() {
        let app = app(true);
        let (status, body) = json_of(&app, Method::GET, "/players/ghost/money", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
        let (status, _) = send(&app, Method::GET, "/players/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_pool_is_503() {
        let app = app(false);
        let (status, body) = json_of(&app, Method::GET, "/leaderboard", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "no live leaderboard replica available");

        let (status, _) = send(
            &app,
            Method::POST,
            "/login",
            Some(json!({ "username": "vale", "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn grid_errors_map_to_http_status() {
        let cases = [
            (
                GridError::ServiceUnavailable {
                    kind: ServiceKind::Garage,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GridError::TrackFull {
                    track_id: TrackId(1),
                },
                StatusCode::CONFLICT,
            ),
            (
                GridError::Timeout {
                    operation: "racing.start_matchmaking",
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                GridError::Rpc {
                    operation: "garage.buy_motorcycle",
                    source: tonic::Status::failed_precondition("broke"),
                },
                StatusCode::CONFLICT,
            ),
            (
                GridError::Rpc {
                    operation: "garage.get_user_money",
                    source: tonic::Status::not_found("nobody"),
                },
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
    }

    #[test]
    fn internal_errors_are_500() {
        let err = AppError::Internal(anyhow::anyhow!("encoder broke"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
