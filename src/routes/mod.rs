//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the chat API, the task relay websocket, and a health probe under a
//! single Axum router with permissive CORS and request tracing.

pub mod chat;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ai/chat", post(chat::send))
        .route("/api/ai/chat/{session_id}", delete(chat::reset))
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
