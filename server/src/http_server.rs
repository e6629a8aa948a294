use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use dietec_core::{
    AggregatedAnswer, ConversationTurn, EngineError, Feature, KeyValueStoreRef, ModePreference,
    ModeSnapshot, QueryEngine, SessionInfo,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Application state shared with all routes
#[derive(Clone)]
pub struct AppState {
    engine: Arc<QueryEngine>,
    store: KeyValueStoreRef,
}

impl AppState {
    pub fn new(engine: Arc<QueryEngine>, store: KeyValueStoreRef) -> Self {
        Self { engine, store }
    }
}

/// Request model for opening a session
#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub feature: Option<String>,
}

/// Request model for queries
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Whether the user asked for online mode
    #[serde(default)]
    pub online: bool,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub online: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub online: bool,
    pub sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub restored: bool,
}

/// Error type for HTTP server
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(e) => match e {
                EngineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::SessionExists(_) | EngineError::Superseded => StatusCode::CONFLICT,
                EngineError::InvalidQuery(_) | EngineError::History(_) => StatusCode::BAD_REQUEST,
                EngineError::AllProvidersExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::BadRequest(msg) => msg,
            Self::Engine(e) => {
                if status.is_server_error() {
                    error!(error = %e, "Request failed");
                } else {
                    warn!(error = %e, "Request rejected");
                }
                e.to_string()
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Builds the router. Split from [`run_server`] so handlers can be driven
/// without a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health))
        .route("/connectivity", post(report_connectivity))
        .route("/sessions", get(list_sessions).post(open_session))
        .route("/sessions/:id", delete(close_session))
        .route("/sessions/:id/query", post(handle_query))
        .route("/sessions/:id/reset", post(reset_session))
        .route("/sessions/:id/mode", get(get_mode).put(set_mode))
        .route("/sessions/:id/history", get(get_history))
        .route("/sessions/:id/history/save", post(save_history))
        .route("/sessions/:id/history/restore", post(restore_history))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn run_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    info!("Starting HTTP server on {}", addr);

    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start HTTP server: {}", e))
}

/// Health check handler
async fn health(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(StatusResponse {
        status: "running",
        online: state.engine.is_online(),
        sessions: state.engine.list_sessions()?.len(),
    }))
}

async fn report_connectivity(
    State(state): State<AppState>,
    Json(payload): Json<ConnectivityRequest>,
) -> StatusCode {
    state.engine.report_connectivity(payload.online);
    StatusCode::ACCEPTED
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    Ok(Json(state.engine.list_sessions()?))
}

async fn open_session(
    State(state): State<AppState>,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let feature = match payload.feature.as_deref() {
        Some(name) => name.parse::<Feature>().map_err(ApiError::BadRequest)?,
        None => Feature::Nutrition,
    };
    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let session = state.engine.open_session(&session_id, feature)?;
    Ok((StatusCode::CREATED, Json(session.info()?)))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.close_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for query requests
async fn handle_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<AggregatedAnswer>, ApiError> {
    let answer = state
        .engine
        .submit_query(&id, &payload.query, ModePreference::from_online(payload.online))
        .await?;
    Ok(Json(answer))
}

async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.reset_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModeSnapshot>, ApiError> {
    Ok(Json(state.engine.mode_snapshot(&id)?))
}

async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ModeRequest>,
) -> Result<Json<ModeSnapshot>, ApiError> {
    let session = state.engine.session(&id)?;
    session.mode().set_user_preference(payload.online);
    Ok(Json(session.mode().snapshot()))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConversationTurn>>, ApiError> {
    Ok(Json(state.engine.session(&id)?.history()?))
}

async fn save_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.save_history(&id, &state.store).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RestoreResponse>, ApiError> {
    let restored = state.engine.load_history(&id, &state.store).await?;
    Ok(Json(RestoreResponse { restored }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use dietec_core::{EngineConfig, InMemoryStore, NetworkStatusMonitor};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let monitor = NetworkStatusMonitor::start(true, Duration::from_millis(10));
        let engine = QueryEngine::builder(EngineConfig::default())
            .with_monitor(monitor)
            .build();
        router(AppState::new(Arc::new(engine), Arc::new(InMemoryStore::new())))
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_open_session_and_query_locally() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/sessions",
                serde_json::json!({"session_id": "s1", "feature": "medical"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let info = body_json(response).await;
        assert_eq!(info["feature"], "medical_advisor");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/sessions/s1/query",
                serde_json::json!({"query": "I have a fever", "online": false}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let answer = body_json(response).await;
        assert_eq!(answer["chosen_mode"], "local");
        assert_eq!(answer["results"][0]["provider_kind"], "local");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sessions/s1/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let history = body_json(response).await;
        assert_eq!(history.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_error_status_codes() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/sessions/missing/query",
                serde_json::json!({"query": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/sessions",
                serde_json::json!({"feature": "astrology"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert!(error.error.contains("astrology"));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    Method::POST,
                    "/sessions",
                    serde_json::json!({"session_id": "dup"}),
                ))
                .await
                .unwrap();
            if response.status() != StatusCode::CREATED {
                assert_eq!(response.status(), StatusCode::CONFLICT);
            }
        }

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/sessions/dup/query",
                serde_json::json!({"query": "  "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mode_toggle() {
        let app = app();
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/sessions",
                serde_json::json!({"session_id": "s1"}),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                Method::PUT,
                "/sessions/s1/mode",
                serde_json::json!({"online": true}),
            ))
            .await
            .unwrap();
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["user_preference"], "online");
        assert_eq!(snapshot["effective_mode"], "online_preferred");
    }

    #[test]
    fn test_exhaustion_maps_to_unavailable() {
        let error = ApiError::from(EngineError::AllProvidersExhausted { failures: Vec::new() });
        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::from(EngineError::Superseded).status(),
            StatusCode::CONFLICT
        );
    }
}
