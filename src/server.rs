//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Plain-text route list |
//! | `GET`  | `/health` | Liveness, uptime, whether any index exists |
//! | `GET`  | `/warmup` | Initialize the embedding provider |
//! | `POST` | `/ingest` | Ingest all devices, waiting for the result |
//! | `POST` | `/ingest-start` | Start ingest in the background |
//! | `GET`  | `/ingest-status` | Snapshot of the background ingest job |
//! | `GET`  | `/debug-files` | Mapped manuals and whether they exist |
//! | `POST` | `/chat` | Answer a question about a device |
//!
//! # Error Contract
//!
//! `/chat` errors use
//!
//! ```json
//! { "error": { "code": "not_found", "message": "device x not in device mapping" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `index_mismatch` (409),
//! `timeout` (504), `internal` (500). The ingest and warmup routes answer
//! `{ "ok": false, "error": "..." }`.
//!
//! Status and diagnostic routes send no-store cache headers so proxies never
//! serve a stale job snapshot.

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::generation::{create_generator, TextGenerator};
use crate::ingest::Ingestor;
use crate::jobs::{AlreadyRunning, IngestJob, IngestJobManager, StartOutcome};
use crate::mapping::{DeviceError, DeviceMapping};
use crate::models::{Answer, ChatMessage};
use crate::pipeline::{QueryError, QueryPipeline};
use crate::store::IndexStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    ingestor: Ingestor,
    jobs: IngestJobManager,
    pipeline: Arc<QueryPipeline>,
    started_at: Instant,
}

impl AppState {
    pub fn new(ingestor: Ingestor, generator: Arc<dyn TextGenerator>) -> Self {
        Self::with_pipeline(ingestor.clone(), QueryPipeline::new(ingestor, generator))
    }

    pub fn with_pipeline(ingestor: Ingestor, pipeline: QueryPipeline) -> Self {
        Self {
            jobs: IngestJobManager::new(ingestor.clone()),
            ingestor,
            pipeline: Arc::new(pipeline),
            started_at: Instant::now(),
        }
    }

    pub fn jobs(&self) -> &IngestJobManager {
        &self.jobs
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let provider = create_provider(&config.embedding)?;
    let store = IndexStore::open(config.index_dir())?;
    let generator = create_generator(&config.generation)?;
    let ingestor = Ingestor::new(config.clone(), provider, store);

    tracing::info!(
        embedder = %ingestor.provider().identity(),
        chat_model = generator.model_name(),
        "pipeline configured"
    );
    let app = router(AppState::new(ingestor, generator));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "RAG server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router with CORS applied.
pub fn router(state: AppState) -> Router {
    let allowed = state.ingestor.config().server.allowed_origins.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts| {
                origin
                    .to_str()
                    .map(|o| allowed.iter().any(|a| o.starts_with(a.as_str())))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/warmup", get(handle_warmup))
        .route("/ingest", post(handle_ingest))
        .route("/ingest-start", post(handle_ingest_start))
        .route("/ingest-status", get(handle_ingest_status))
        .route("/debug-files", get(handle_debug_files))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

/// Map pipeline failures onto status codes by their typed cause.
fn classify_error(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);

    let (status, code) = if let Some(device_err) = err.downcast_ref::<DeviceError>() {
        match device_err {
            DeviceError::InvalidId(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            DeviceError::NotMapped(_) | DeviceError::DocumentMissing { .. } => {
                (StatusCode::NOT_FOUND, "not_found")
            }
        }
    } else if let Some(query_err) = err.downcast_ref::<QueryError>() {
        match query_err {
            QueryError::IndexMismatch { .. } => (StatusCode::CONFLICT, "index_mismatch"),
            QueryError::GenerationTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            QueryError::EmptyIndex { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal")
    };

    if status.is_server_error() {
        tracing::error!(error = %message, "request failed");
    } else {
        tracing::warn!(error = %message, "request rejected");
    }

    AppError {
        status,
        code,
        message,
    }
}

/// `{ ok: false, error }` with the given status.
fn not_ok(status: StatusCode, err: &anyhow::Error) -> Response {
    let message = format!("{:#}", err);
    tracing::error!(error = %message, "operation failed");
    (
        status,
        Json(serde_json::json!({ "ok": false, "error": message })),
    )
        .into_response()
}

fn no_store_headers() -> [(HeaderName, &'static str); 5] {
    [
        (
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate, max-age=0",
        ),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
        (HeaderName::from_static("surrogate-control"), "no-store"),
        (HeaderName::from_static("cdn-cache-control"), "no-store"),
    ]
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============ GET / ============

async fn handle_index() -> &'static str {
    "Device manual RAG API is running.\n\n\
     • GET  /health\n\
     • GET  /warmup\n\
     • POST /ingest        (blocking)\n\
     • POST /ingest-start  (background)\n\
     • GET  /ingest-status\n\
     • POST /chat          { device_id, message, history? }\n\
     • GET  /debug-files\n"
}

// ============ GET /health ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    uptime_sec: u64,
    has_indexes: bool,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let has_indexes = state
        .ingestor
        .store()
        .list()
        .map(|ids| !ids.is_empty())
        .unwrap_or(false);
    Json(HealthResponse {
        ok: true,
        uptime_sec: state.started_at.elapsed().as_secs(),
        has_indexes,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /warmup ============

async fn handle_warmup(State(state): State<AppState>) -> Response {
    match state.ingestor.provider().warm_up().await {
        Ok(()) => Json(serde_json::json!({ "ok": true, "message": "Embedder ready" })).into_response(),
        Err(e) => not_ok(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

// ============ POST /ingest ============

async fn handle_ingest(State(state): State<AppState>) -> Response {
    match state.jobs.run_now().await {
        Ok(report) => Json(serde_json::json!({ "ok": true, "report": report })).into_response(),
        Err(e) if e.downcast_ref::<AlreadyRunning>().is_some() => not_ok(StatusCode::CONFLICT, &e),
        Err(e) => not_ok(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

// ============ POST /ingest-start ============

async fn handle_ingest_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.jobs.start() {
        StartOutcome::Started => Json(serde_json::json!({ "ok": true, "started": true })),
        StartOutcome::AlreadyRunning => Json(serde_json::json!({
            "ok": true,
            "running": true,
            "message": "Ingest already running"
        })),
    }
}

// ============ GET /ingest-status ============

#[derive(Serialize)]
struct StatusResponse {
    ok: bool,
    #[serde(flatten)]
    job: IngestJob,
    ts: i64,
}

async fn handle_ingest_status(State(state): State<AppState>) -> impl IntoResponse {
    let body = StatusResponse {
        ok: true,
        job: state.jobs.status(),
        ts: now_millis(),
    };
    (no_store_headers(), Json(body))
}

// ============ GET /debug-files ============

async fn handle_debug_files(State(state): State<AppState>) -> Response {
    let config = state.ingestor.config();
    let mapping = match DeviceMapping::from_config(config) {
        Ok(m) => m,
        Err(e) => {
            let mut resp = not_ok(StatusCode::INTERNAL_SERVER_ERROR, &e);
            for (name, value) in no_store_headers() {
                resp.headers_mut()
                    .insert(name, HeaderValue::from_static(value));
            }
            return resp;
        }
    };

    let mut details = serde_json::Map::new();
    for (device_id, relative) in mapping.iter() {
        let path = config.resolve_document(relative);
        let indexed = state.ingestor.store().exists(device_id).unwrap_or(false);
        details.insert(
            device_id.to_string(),
            serde_json::json!({
                "path": path.display().to_string(),
                "exists": path.is_file(),
                "indexed": indexed,
            }),
        );
    }

    (
        no_store_headers(),
        Json(serde_json::json!({ "ok": true, "details": details, "ts": now_millis() })),
    )
        .into_response()
}

// ============ POST /chat ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChatRequest {
    device_id: Option<String>,
    message: Option<String>,
    history: Vec<ChatMessage>,
}

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    // Unreadable bodies and a missing Content-Type are both plain 400s.
    let Json(req) = body.map_err(|rejection| bad_request(rejection.body_text()))?;
    let device_id = req.device_id.unwrap_or_default();
    let message = req.message.unwrap_or_default();
    if device_id.trim().is_empty() || message.trim().is_empty() {
        return Err(bad_request("device_id and message required"));
    }

    let answer = state
        .pipeline
        .answer(&device_id, &message, &req.history)
        .await
        .map_err(classify_error)?;

    Ok(Json(answer))
}
