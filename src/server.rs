//! HTTP server for question answering.
//!
//! Exposes the retriever as a small JSON API so editors and other tools
//! can ask questions about the indexed code without shelling out to `chx`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Answer a question (or only retrieve, with `retrieve_only`) |
//! | `GET`  | `/api/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `timeout` (408), `upstream` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use code_harness_core::error::RagError;
use code_harness_core::retrieve::{NoopObserver, Retriever};

use crate::ask::{build_retriever, AskArgs};
use crate::config::Config;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    retriever: Arc<Retriever>,
    /// Upper bound for one request, retrieval and generation included.
    timeout: Duration,
}

/// Starts the HTTP server on `[server].bind` (or `bind_override`). Runs
/// until the process is terminated.
pub async fn run_server(config: &Config, bind_override: Option<String>) -> anyhow::Result<()> {
    let bind_addr = bind_override.unwrap_or_else(|| config.server.bind.clone());
    let retriever = build_retriever(config, Arc::new(NoopObserver)).await?;
    let app = router(
        Arc::new(retriever),
        Duration::from_secs(config.generation.timeout_secs),
    );

    println!("chx server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(retriever: Arc<Retriever>, timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { retriever, timeout })
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

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Map a retriever failure to a response. Provider failures are upstream
/// errors unless the provider is simply switched off.
fn classify_error(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    match err.downcast_ref::<RagError>() {
        Some(RagError::ExternalService { service, .. }) if message.contains("disabled") => {
            if *service == "embedding" {
                app_error(StatusCode::BAD_REQUEST, "embeddings_disabled", message)
            } else {
                bad_request(message)
            }
        }
        Some(RagError::ExternalService { .. }) => {
            app_error(StatusCode::BAD_GATEWAY, "upstream", message)
        }
        _ if message.contains("timed out") => {
            app_error(StatusCode::REQUEST_TIMEOUT, "timeout", message)
        }
        _ => app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message),
    }
}

// ============ GET /api/health ============

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

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    top_k: Option<usize>,
    language: Option<String>,
    kind: Option<String>,
    #[serde(default)]
    no_hybrid: bool,
    #[serde(default)]
    retrieve_only: bool,
}

/// Handler for `POST /api/query`. Returns the `QueryResponse` JSON, or the
/// bare retrieval when `retrieve_only` is set.
async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let args = AskArgs {
        top_k: req.top_k,
        language: req.language,
        kind: req.kind,
        no_hybrid: req.no_hybrid,
        retrieve_only: req.retrieve_only,
        json: true,
    };
    let opts = args
        .query_options()
        .map_err(|e| bad_request(e.to_string()))?;

    let retriever = Arc::clone(&state.retriever);
    let question = req.question;
    let work = async move {
        if args.retrieve_only {
            let retrieval = retriever.retrieve_only(&question, &opts).await?;
            Ok::<_, anyhow::Error>(serde_json::to_value(retrieval)?)
        } else {
            let response = retriever.query(&question, &opts).await?;
            Ok(serde_json::to_value(response)?)
        }
    };

    match tokio::time::timeout(state.timeout, work).await {
        Ok(Ok(value)) => Ok(Json(value)),
        Ok(Err(e)) => Err(classify_error(e)),
        Err(_) => Err(app_error(
            StatusCode::REQUEST_TIMEOUT,
            "timeout",
            format!("query timed out after {}s", state.timeout.as_secs()),
        )),
    }
}
