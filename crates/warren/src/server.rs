//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/content` | Ingest one content item |
//! | `GET`  | `/content/{id}` | Fetch a content item |
//! | `POST` | `/search` | Run staged retrieval |
//! | `POST` | `/context` | Assemble a prompt without calling the model |
//! | `POST` | `/sessions/{id}/documents` | Attach a document to a session |
//! | `GET`  | `/sessions/{id}/history` | Conversation history |
//! | `POST` | `/warren/generate` | Draft content |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! CORS permits all origins, methods, and headers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use warren_core::assembler::AssemblyReport;
use warren_core::models::{ContentItem, ContentKind, ConversationTurn, SessionDocument};
use warren_core::prompt::PromptPayload;
use warren_core::retrieval::RetrievalOutcome;

use crate::config::Config;
use crate::ingest::ingest_items;
use crate::warren::{GenerationRequest, GenerationResponse, Warren};

#[derive(Clone)]
pub struct AppState {
    warren: Arc<Warren>,
    chunk_max_tokens: usize,
}

impl AppState {
    pub fn new(warren: Arc<Warren>, chunk_max_tokens: usize) -> Self {
        Self {
            warren,
            chunk_max_tokens,
        }
    }
}

/// Build the router. Separate from [`run_server`] so tests can bind it to
/// an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/content", post(handle_add_content))
        .route("/content/{id}", get(handle_get_content))
        .route("/search", post(handle_search))
        .route("/context", post(handle_context))
        .route("/sessions/{id}/documents", post(handle_add_document))
        .route("/sessions/{id}/history", get(handle_history))
        .route("/warren/generate", post(handle_generate))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let warren = Warren::from_config(config).await?;
    let app = router(AppState::new(
        Arc::new(warren),
        config.chunking.max_tokens,
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "Warren API listening");
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

fn require_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ /content ============

#[derive(Serialize)]
struct AddContentResponse {
    id: String,
    chunks: usize,
    embedded: usize,
    warnings: Vec<String>,
}

async fn handle_add_content(
    State(state): State<AppState>,
    Json(item): Json<ContentItem>,
) -> Result<Json<AddContentResponse>, AppError> {
    let warren = &state.warren;
    let report = ingest_items(
        warren.content_store().as_ref(),
        warren.embedder(),
        vec![item],
        state.chunk_max_tokens,
    )
    .await
    .map_err(internal)?;

    // A skipped item means it failed validation.
    let id = match report.ids.first() {
        Some(id) => id.clone(),
        None => {
            let reason = report.warnings.join("; ");
            return Err(bad_request(reason));
        }
    };

    Ok(Json(AddContentResponse {
        id,
        chunks: report.chunks,
        embedded: report.embedded,
        warnings: report.warnings,
    }))
}

async fn handle_get_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContentItem>, AppError> {
    state
        .warren
        .content_store()
        .get_content(&id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("content not found: {}", id)))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    kinds: Option<Vec<ContentKind>>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<RetrievalOutcome>, AppError> {
    require_text("query", &req.query)?;
    let outcome = state
        .warren
        .search(&req.query, req.audience.as_deref(), req.kinds, req.limit)
        .await;
    Ok(Json(outcome))
}

// ============ POST /context ============

#[derive(Deserialize)]
struct ContextRequest {
    session_id: String,
    query: String,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    content_kind_hint: Option<ContentKind>,
}

#[derive(Serialize)]
struct ContextResponse {
    payload: PromptPayload,
    report: AssemblyReport,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    require_text("session_id", &req.session_id)?;
    require_text("query", &req.query)?;
    let prepared = state
        .warren
        .prepare(
            &req.session_id,
            &req.query,
            req.audience.as_deref(),
            req.content_kind_hint,
        )
        .await
        .map_err(|(e, _)| bad_request(e.to_string()))?;

    Ok(Json(ContextResponse {
        payload: prepared.payload,
        report: prepared.context.report,
    }))
}

// ============ /sessions ============

#[derive(Deserialize)]
struct AddDocumentRequest {
    title: String,
    body: String,
}

#[derive(Serialize)]
struct AddDocumentResponse {
    id: String,
}

async fn handle_add_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<AddDocumentRequest>,
) -> Result<Json<AddDocumentResponse>, AppError> {
    require_text("title", &req.title)?;
    require_text("body", &req.body)?;
    let doc = SessionDocument {
        id: Uuid::new_v4().to_string(),
        session_id,
        title: req.title.trim().to_string(),
        body: req.body,
        created_at: chrono::Utc::now().timestamp(),
    };
    let id = state
        .warren
        .session_store()
        .add_session_document(&doc)
        .await
        .map_err(internal)?;
    Ok(Json(AddDocumentResponse { id }))
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

#[derive(Serialize)]
struct HistoryResponse {
    turns: Vec<ConversationTurn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let turns = state
        .warren
        .session_store()
        .conversation_history(&session_id, params.limit)
        .await
        .map_err(internal)?;
    Ok(Json(HistoryResponse { turns }))
}

// ============ POST /warren/generate ============

async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>, AppError> {
    require_text("session_id", &req.session_id)?;
    require_text("prompt", &req.prompt)?;
    Ok(Json(state.warren.generate(&req).await))
}
