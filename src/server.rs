//! HTTP tool server.
//!
//! Exposes vault search as a JSON tool endpoint for AI assistants.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version and circuit breaker state) |
//! | `POST` | `/tools/search` | Run the retrieval pipeline |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `remote_unavailable` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based clients
//! can call tools directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use vault_context_core::options::SearchOptions;
use vault_context_core::store::RemoteStore;
use vault_context_core::Error;

use crate::client::VaultClient;
use crate::config::Config;
use crate::search::{search, SearchResult};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn RemoteStore>,
    options: Arc<SearchOptions>,
    client: Option<VaultClient>,
}

/// Build the router for a store. Used directly by tests.
pub fn router(store: Arc<dyn RemoteStore>, options: SearchOptions) -> Router {
    build_router(AppState {
        store,
        options: Arc::new(options),
        client: None,
    })
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/search", post(handle_search))
        .layer(cors)
        .with_state(state)
}

/// Serve until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let client = VaultClient::from_config(config)?;
    let state = AppState {
        store: Arc::new(client.clone()),
        options: Arc::new(config.search_options()),
        client: Some(client),
    };
    let app = build_router(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, vault = %config.vault.base_url, "tool server listening");
    eprintln!("Tool server listening on http://{}", bind_addr);

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

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument { .. } => bad_request(err.to_string()),
            Error::RemoteUnavailable { .. } => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "remote_unavailable",
                message: err.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: other.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    breaker: Option<&'static str>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        breaker: state.client.as_ref().map(|c| c.breaker().state().as_str()),
    })
}

// ============ POST /tools/search ============

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    max_tokens: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResult>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let mut options = (*state.options).clone();
    if let Some(limit) = req.limit {
        options.aggregation.limit = limit;
    }
    if let Some(max_tokens) = req.max_tokens {
        options.context.max_tokens = max_tokens;
    }

    // Dropping the token's guard cancels the search if the client goes away.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let result = search(Arc::clone(&state.store), &req.query, &options, cancel).await?;
    Ok(Json(result))
}
