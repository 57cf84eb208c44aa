//! HTTP request handlers

use super::sse::{session_stream, SessionGuard};
use super::types::{ErrorResponse, HealthResponse, MessageResponse, SendMessageRequest};
use super::AppState;
use crate::auth::AuthError;
use crate::conversation::ConversationError;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/sessions/start", get(start_session))
        .route("/api/sessions/:id/messages", post(send_message))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        open_sessions: state.engine.relay().open_count(),
        pending_sessions: state.engine.relay().reserved_count(),
    })
}

/// Start a session and hold its event stream open
async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user_id = state.auth.authenticate(&headers)?;

    let mut started = state.engine.start().await?;
    let (tx, rx) = mpsc::channel(state.outbound_capacity);
    state.engine.attach(&mut started, tx, &user_id).await?;
    tracing::info!(session_id = %started.session_id, user_id = %user_id, "Session stream opened");

    let guard = SessionGuard::new(Arc::clone(&state.engine), &started.session_id);
    Ok(session_stream(rx, guard).into_response())
}

/// Accept a user message; the reply arrives on the session stream
async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let user_id = state.auth.authenticate(&headers)?;

    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let text = request.message.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("message must not be empty".into()));
    }

    let relay = state.engine.relay();
    if !relay.is_open(&session_id) {
        return Err(AppError::NotFound(format!("Session not found: {session_id}")));
    }
    if !relay.is_owner(&session_id, &user_id) {
        tracing::warn!(session_id = %session_id, user_id = %user_id, "Message from non-owner rejected");
        return Err(AppError::Forbidden("session belongs to another user".into()));
    }

    let engine = Arc::clone(&state.engine);
    let text = text.to_string();
    tokio::spawn(async move {
        engine.handle_message(&session_id, &text).await;
    });

    Ok(Json(MessageResponse::new("Successfully sent message")))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Internal(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Unauthorized(err.to_string())
    }
}

impl From<ConversationError> for AppError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::SessionNotFound(_) => AppError::NotFound(err.to_string()),
            ConversationError::Llm(_) => AppError::Upstream(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
