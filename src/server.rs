//! HTTP API.
//!
//! A thin JSON layer over [`NewsDesk`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service description |
//! | `GET`  | `/health` | Status, ingestion state, index size and stats |
//! | `POST` | `/ask` | Answer a question: `{ "question": "...", "top_k": 5 }` |
//! | `GET`  | `/stats` | Index, ingestion and cache counters |
//! | `GET`  | `/articles?limit=10` | Most recently indexed articles |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `no_relevant_documents` (404),
//! `index_empty` (503). An answer whose generation failed is still a `200`
//! carrying `"status": "error"` or `"status": "fallback"`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use newsdesk_core::models::{Answer, AnswerStatus, Document};

use crate::ingest::IngestState;
use crate::service::{IndexStats, NewsDesk, ServiceStats};

const MAX_ARTICLES: usize = 100;
const DEFAULT_ARTICLES: usize = 10;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    desk: Arc<NewsDesk>,
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(desk: Arc<NewsDesk>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/stats", get(handle_stats))
        .route("/articles", get(handle_articles))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { desk })
}

/// Bind `[server].bind` and serve until `shutdown` resolves.
pub async fn run_server<F>(desk: Arc<NewsDesk>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = desk.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "newsdesk listening");
    serve(listener, desk, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    desk: Arc<NewsDesk>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(desk))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"index_empty"`).
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

fn from_answer(answer: &Answer) -> Option<AppError> {
    match answer.status {
        AnswerStatus::IndexEmpty => Some(AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "index_empty".to_string(),
            message: "Vector index is empty. Ingestion may still be initializing.".to_string(),
        }),
        AnswerStatus::NoRelevantDocuments => Some(AppError {
            status: StatusCode::NOT_FOUND,
            code: "no_relevant_documents".to_string(),
            message: answer.answer.clone(),
        }),
        _ => None,
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    description: &'static str,
    endpoints: Vec<(&'static str, &'static str)>,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        name: "newsdesk",
        version: env!("CARGO_PKG_VERSION"),
        description: "Live retrieval-augmented answers over breaking news",
        endpoints: vec![
            ("GET /health", "Health check and system status"),
            ("POST /ask", "Ask a question about the latest news"),
            ("GET /stats", "Index, ingestion and cache statistics"),
            ("GET /articles", "List recently indexed articles"),
        ],
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ingestion_state: IngestState,
    pipeline_running: bool,
    index_size: usize,
    index_stats: IndexStats,
    timestamp: DateTime<Utc>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.desk.stats();
    let ingestion_state = stats.ingestion_state;
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        ingestion_state,
        pipeline_running: ingestion_state != IngestState::Stopped,
        index_size: stats.index.size,
        index_stats: stats.index,
        timestamp: Utc::now(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let max_top_k = state.desk.engine().settings().max_top_k;
    if let Some(k) = request.top_k {
        if !(1..=max_top_k).contains(&k) {
            return Err(bad_request(format!("top_k must be between 1 and {}", max_top_k)));
        }
    }

    let answer = state.desk.submit_question(question, request.top_k).await;
    info!(
        status = answer.status.as_str(),
        sources = answer.sources.len(),
        "question answered"
    );
    match from_answer(&answer) {
        Some(err) => Err(err),
        None => Ok(Json(answer)),
    }
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Json<ServiceStats> {
    Json(state.desk.stats())
}

// ============ GET /articles ============

#[derive(Deserialize)]
struct ArticlesParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ArticlesResponse {
    count: usize,
    articles: Vec<Document>,
}

async fn handle_articles(
    State(state): State<AppState>,
    Query(params): Query<ArticlesParams>,
) -> Result<Json<ArticlesResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_ARTICLES);
    if !(1..=MAX_ARTICLES).contains(&limit) {
        return Err(bad_request(format!(
            "limit must be between 1 and {}",
            MAX_ARTICLES
        )));
    }
    let articles = state.desk.recent_documents(limit);
    Ok(Json(ArticlesResponse {
        count: articles.len(),
        articles,
    }))
}
