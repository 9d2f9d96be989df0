//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check (returns version) |
//! | `POST` | `/chat` | Answer `{"message": "..."}` from the knowledge base |
//! | `GET`  | `/status` | Current refresh cycle state |
//! | `POST` | `/refresh` | Start a refresh cycle in the background |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "embedding_unavailable", "message": "..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `refresh_running` | 409 |
//! | `embedding_unavailable`, `completion_unavailable` | 502 |
//! | `storage_failure` | 503 |
//! | `timeout` | 504 |
//!
//! All origins, methods and headers are allowed (CORS).

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use chatvat_core::Error;

use crate::app::App;
use crate::chat::ChatService;
use crate::refresh::{RefreshCycleState, RefreshOrchestrator};

#[derive(Clone)]
pub struct AppState {
    chat: ChatService,
    orchestrator: Arc<RefreshOrchestrator>,
    /// Cancels cycles started through `POST /refresh`.
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        chat: ChatService,
        orchestrator: Arc<RefreshOrchestrator>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chat,
            orchestrator,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/status", get(handle_status))
        .route("/refresh", post(handle_refresh))
        .layer(cors)
        .with_state(state)
}

/// Serve HTTP and run the refresh loop until Ctrl-C.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.bind_addr();
    let chat = app.chat_service()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let interval = match app.config.refresh_interval_minutes {
        0 => None,
        minutes => Some(Duration::from_secs(minutes * 60)),
    };
    let refresh_loop = tokio::spawn(app.orchestrator.clone().run_periodic(
        Duration::from_secs(app.config.refresh.initial_delay_secs),
        interval,
        shutdown_rx.clone(),
    ));

    let state = AppState::new(chat, app.orchestrator.clone(), shutdown_rx);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, bot = %app.config.bot_name, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = refresh_loop.await {
        tracing::warn!(error = %e, "refresh loop ended abnormally");
    }
    app.orchestrator.wait_idle().await;
    app.store.close().await;
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

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidInput(_) | Error::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            Error::EmbeddingUnavailable(_)
            | Error::CompletionUnavailable(_)
            | Error::FetchFailure { .. } => StatusCode::BAD_GATEWAY,
            Error::StorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        if status.is_server_error() {
            tracing::warn!(code = err.code(), error = %err, "chat request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
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
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    let message = request
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| bad_request("message must not be empty"))?;

    let ctx = state.chat.ask(&message).await?;
    Ok(Json(ChatResponse {
        message: ctx.answer.unwrap_or_default(),
    }))
}

// ============ GET /status ============

async fn handle_status(State(state): State<AppState>) -> Json<RefreshCycleState> {
    Json(state.orchestrator.state())
}

// ============ POST /refresh ============

#[derive(Serialize)]
struct RefreshStarted {
    status: &'static str,
}

async fn handle_refresh(State(state): State<AppState>) -> Result<Response, AppError> {
    if !state.orchestrator.spawn_cycle(state.shutdown.clone()) {
        return Err(AppError {
            status: StatusCode::CONFLICT,
            code: "refresh_running".to_string(),
            message: "a refresh cycle is already running".to_string(),
        });
    }
    Ok((StatusCode::ACCEPTED, Json(RefreshStarted { status: "started" })).into_response())
}
