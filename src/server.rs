//! JSON HTTP API in front of the assistant.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/answer` | Answer a query within a named session |
//! | `GET`  | `/tools/list` | Registered tool descriptors |
//! | `GET`  | `/sessions/{id}/history` | Retained turns of a session |
//! | `DELETE` | `/sessions/{id}` | Remove a session and its history |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `synthesis_failed` (502), `internal` (500).
//!
//! # Sessions
//!
//! Each session is a [`ConversationState`] behind its own mutex, so
//! concurrent requests for the same session are answered one at a time and
//! their turns are appended in order. Different sessions proceed in
//! parallel. A session is created by its first `/answer` and lives until
//! `DELETE /sessions/{id}` removes it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use business_assistant_core::conversation::ConversationState;
use business_assistant_core::models::{ConversationTurn, ToolDescriptor};

use crate::assistant::{Answer, Assistant};
use crate::error::AssistantError;

pub const DEFAULT_SESSION: &str = "default";

type SessionMap = HashMap<String, Arc<Mutex<ConversationState>>>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    assistant: Arc<Assistant>,
    sessions: Arc<RwLock<SessionMap>>,
}

impl AppState {
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self {
            assistant,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn session(&self, id: &str) -> Option<Arc<Mutex<ConversationState>>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn session_or_create(&self, id: &str) -> Arc<Mutex<ConversationState>> {
        if let Some(existing) = self.session(id).await {
            return existing;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(self.assistant.new_session())))
            .clone()
    }
}

/// Build the router. Exposed separately so tests can serve it on an
/// ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/answer", post(handle_answer))
        .route("/tools/list", get(handle_list_tools))
        .route("/sessions/{id}/history", get(handle_history))
        .route("/sessions/{id}", delete(handle_reset))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve on `bind` until the process is terminated.
pub async fn run_server(bind: &str, assistant: Arc<Assistant>) -> anyhow::Result<()> {
    let app = router(AppState::new(assistant));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<AssistantError> for AppError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::InvalidQuery(msg) => bad_request(msg),
            AssistantError::Synthesis(e) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "synthesis_failed".to_string(),
                message: e.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: other.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.assistant.registry().descriptors(),
    })
}

// ============ POST /answer ============

#[derive(Deserialize)]
struct AnswerRequest {
    query: String,
    #[serde(default)]
    session: Option<String>,
}

async fn handle_answer(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<Answer>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let session_id = req
        .session
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());

    let session = state.session_or_create(&session_id).await;
    let mut conversation = session.lock().await;
    let answer = state.assistant.answer(&req.query, &mut conversation).await?;
    Ok(Json(answer))
}

// ============ Sessions ============

#[derive(Serialize)]
struct HistoryResponse {
    session: String,
    total_appended: u64,
    turns: Vec<ConversationTurn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = state
        .session(&id)
        .await
        .ok_or_else(|| not_found(format!("no session named: {}", id)))?;
    let conversation = session.lock().await;
    Ok(Json(HistoryResponse {
        session: id,
        total_appended: conversation.total_appended(),
        turns: conversation.turns().cloned().collect(),
    }))
}

#[derive(Serialize)]
struct ResetResponse {
    session: String,
    cleared: usize,
}

async fn handle_reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    let session = state
        .sessions
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| not_found(format!("no session named: {}", id)))?;
    // waits for any in-flight answer on this session
    let mut conversation = session.lock().await;
    let cleared = conversation.len();
    conversation.reset();
    info!(session = %id, cleared, "session removed");
    Ok(Json(ResetResponse {
        session: id,
        cleared,
    }))
}
