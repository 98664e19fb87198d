//! HTTP request handlers

use super::types::{
    ActionDetailsBody, ChatRequest, ChatResponse, ConfirmRequest, ConfirmResponse, ErrorResponse,
    ThreadResponse,
};
use super::AppState;
use crate::runtime::{ChatInput, ChatOutcome, RuntimeError};
use crate::state_machine::TransitionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/confirm-action", post(confirm_action))
        .route("/api/threads/:id", get(get_thread))
        .with_state(state)
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let outcome = state
        .runtime
        .chat(ChatInput {
            message: req.message,
            thread_id: req.thread_id,
            passenger_id: req.passenger_id,
        })
        .await?;
    Ok(Json(chat_response(outcome)))
}

async fn confirm_action(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let outcome = state
        .runtime
        .resolve_action(&req.thread_id, &req.action_id, req.confirmed, req.feedback)
        .await?;
    Ok(Json(ConfirmResponse::success(chat_response(outcome))))
}

async fn get_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadResponse>, AppError> {
    let thread = state
        .runtime
        .snapshot(&id)?
        .ok_or_else(|| AppError::NotFound(format!("No thread found with id {id}")))?;
    Ok(Json(ThreadResponse {
        thread: serde_json::to_value(thread).unwrap_or(Value::Null),
    }))
}

fn chat_response(outcome: ChatOutcome) -> ChatResponse {
    ChatResponse {
        thread_id: outcome.thread_id,
        response: outcome.response,
        requires_confirmation: outcome.requires_confirmation,
        action_details: outcome.action.map(|a| ActionDetailsBody {
            id: a.id,
            name: a.tool_name,
            arguments: a.arguments,
        }),
    }
}

// ============================================================
// Error mapping
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    UpstreamFailure(String),
    Internal,
}

impl From<RuntimeError> for AppError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::UnknownAction(id) => {
                AppError::NotFound(format!("No pending action with id {id}"))
            }
            RuntimeError::AlreadyResolved(id) => {
                AppError::Conflict(format!("Action {id} was already resolved"))
            }
            RuntimeError::Transition(
                e @ (TransitionError::Busy | TransitionError::ConfirmationPending),
            ) => AppError::Conflict(e.to_string()),
            RuntimeError::Transition(e @ TransitionError::ModelUnresponsive { .. }) => {
                AppError::UpstreamFailure(e.to_string())
            }
            RuntimeError::Transition(e) => AppError::BadRequest(e.to_string()),
            RuntimeError::Model { message } => {
                AppError::UpstreamFailure(format!("Model request failed: {message}"))
            }
            // Storage details stay out of responses
            RuntimeError::Persistence(e) => {
                tracing::error!(error = %e, "checkpoint storage failure");
                AppError::Internal
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::UpstreamFailure(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
