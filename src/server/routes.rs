//! HTTP surface: chat endpoints for both slots, training submission and
//! status, and a health probe.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::runtime::{GenerationOptions, ModelRuntimeExt, Slot};
use crate::training::TrainingParams;

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/adapter/chat", post(adapter_chat))
        .route("/v1/train", get(list_jobs).post(submit_training))
        .route("/v1/train/{id}", get(training_status))
        .with_state(state)
}

/// Error envelope for every non-2xx response.
pub struct ApiError(RuntimeError);

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn internal(msg: impl std::fmt::Display) -> Self {
        Self(RuntimeError::Generation(anyhow::anyhow!("{msg}")))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RuntimeError::Training(_) => StatusCode::BAD_REQUEST,
            RuntimeError::AdapterNotFound { .. } => StatusCode::NOT_FOUND,
            RuntimeError::Busy(_) => StatusCode::CONFLICT,
            RuntimeError::TrainingUnsupported => StatusCode::NOT_IMPLEMENTED,
            RuntimeError::Load(_)
            | RuntimeError::NotLoaded(_)
            | RuntimeError::Generation(_) => StatusCode::SERVICE_UNAVAILABLE,
            RuntimeError::ConfigMismatch { .. } | RuntimeError::UnsupportedProvider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub provider: String,
}

impl ChatRequest {
    fn options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "provider": state.chat_provider,
        "training_supported": state.registry.supports_training(),
    }))
}

async fn run_chat(
    state: AppState,
    slot: Slot,
    request: ChatRequest,
) -> Result<Json<ChatResponse>, ApiError> {
    let registry = state.registry.clone();
    // First request on a cold slot pays the model load here.
    let runtime = tokio::task::spawn_blocking(move || registry.acquire(slot))
        .await
        .map_err(ApiError::internal)??;

    let provider = runtime.kind().to_string();
    let response = runtime
        .generate_async(request.prompt.clone(), request.options())
        .await?;
    Ok(Json(ChatResponse { response, provider }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    run_chat(state, Slot::Chat, request).await
}

async fn adapter_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if !state.registry.supports_training() {
        return Err(ApiError(RuntimeError::TrainingUnsupported));
    }
    run_chat(state, Slot::Adapter, request).await
}

async fn submit_training(
    State(state): State<AppState>,
    Json(params): Json<TrainingParams>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id = state.driver.submit(params)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": id }))))
}

async fn training_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.driver.status(id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown training job {id}") })),
        )
            .into_response(),
    }
}

async fn list_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "jobs": state.driver.list() }))
}
