//! AI chat HTTP handlers.
//!
//! `POST /api/ai/chat` relays one message and returns `{reply}`. Errors map
//! to `{error, details}` with 400 for bad input, 429 for rate limits, and
//! 500 for everything upstream.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::services::chat::{self, ChatError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub reply: String,
}

pub async fn send(State(state): State<AppState>, payload: Result<Json<ChatRequest>, JsonRejection>) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "chat: rejected request body");
            return error_response(StatusCode::BAD_REQUEST, "Invalid request", &rejection.body_text());
        }
    };
    let Some(message) = req.message else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request", "message is required");
    };

    match chat::send_message(&state, req.session_id.as_deref(), &message).await {
        Ok(reply) => Json(ChatReply { reply }).into_response(),
        Err(e) => {
            let (status, summary) = classify(&e);
            error_response(status, summary, &e.to_string())
        }
    }
}

/// `DELETE /api/ai/chat/{session_id}`: forget a session's history.
pub async fn reset(State(state): State<AppState>, Path(session_id): Path<String>) -> StatusCode {
    let existed = state.sessions.forget(&session_id);
    info!(session = %session_id, existed, "chat: session reset");
    StatusCode::NO_CONTENT
}

fn classify(err: &ChatError) -> (StatusCode, &'static str) {
    match err {
        ChatError::EmptyMessage => (StatusCode::BAD_REQUEST, "Invalid request"),
        ChatError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "Too many requests"),
        ChatError::NotConfigured => (StatusCode::INTERNAL_SERVER_ERROR, "AI assistant is not configured"),
        ChatError::Llm(_) | ChatError::EmptyReply => (StatusCode::INTERNAL_SERVER_ERROR, "AI request failed"),
    }
}

fn error_response(status: StatusCode, error: &str, details: &str) -> Response {
    (status, Json(json!({ "error": error, "details": details }))).into_response()
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
