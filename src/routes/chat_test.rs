use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::llm::LlmChat;
use crate::llm::types::Message;
use crate::rate_limit::RateLimiter;
use crate::routes::app;
use crate::services::session::SessionStore;
use crate::state::AppState;
use crate::store::memory::InMemoryTaskStore;
use crate::state::test_helpers::{self, MockLlm};

async fn post_chat(state: &AppState, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/ai/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_owned()))
        .unwrap();
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn chat_returns_reply() {
    let state = test_helpers::test_app_state_with_llm(Arc::new(MockLlm::replying("hello back")));
    let (status, body) = post_chat(&state, r#"{"sessionId":"u1","message":"hello"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "hello back");
    assert_eq!(state.sessions.history("u1").len(), 3);
}

#[tokio::test]
async fn blank_message_is_400() {
    let state = test_helpers::test_app_state_with_llm(Arc::new(MockLlm::replying("x")));
    let (status, body) = post_chat(&state, r#"{"sessionId":"u1","message":"   "}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request");
    assert_eq!(state.sessions.session_count(), 0);
}

#[tokio::test]
async fn missing_message_is_400() {
    let state = test_helpers::test_app_state_with_llm(Arc::new(MockLlm::replying("x")));
    let (status, body) = post_chat(&state, r#"{"sessionId":"u1"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], "message is required");
}

#[tokio::test]
async fn malformed_json_is_400() {
    let state = test_helpers::test_app_state_with_llm(Arc::new(MockLlm::replying("x")));
    let (status, body) = post_chat(&state, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request");
    assert!(body["details"].is_string());
}

#[tokio::test]
async fn llm_failure_is_500_with_details() {
    let state = test_helpers::test_app_state_with_llm(Arc::new(MockLlm::failing(502)));
    let (status, body) = post_chat(&state, r#"{"message":"hello"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "AI request failed");
    assert!(body["details"].as_str().unwrap().contains("502"));
    assert_eq!(state.sessions.session_count(), 0);
}

#[tokio::test]
async fn unconfigured_llm_is_500() {
    let state = test_helpers::test_app_state();
    let (status, body) = post_chat(&state, r#"{"message":"hello"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "AI assistant is not configured");
}

#[tokio::test]
async fn rate_limit_is_429() {
    let state = test_helpers::test_app_state_with_rate_limit(
        Arc::new(MockLlm::replying("ok")),
        crate::rate_limit::RateLimitConfig { per_session_limit: 1, ..Default::default() },
    );
    let (first, _) = post_chat(&state, r#"{"sessionId":"u1","message":"a"}"#).await;
    let (second, body) = post_chat(&state, r#"{"sessionId":"u1","message":"b"}"#).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Too many requests");
}

#[tokio::test]
async fn default_config_prunes_long_session_without_throttling() {
    let config = AppConfig::from_lookup(|key: &str| (key == "TASK_STORE").then(|| "memory".to_owned())).unwrap();
    let sessions = SessionStore::new(config.sessions, config.chat.system_prompt.clone());
    let llm: Arc<dyn LlmChat> = Arc::new(MockLlm::echo());
    let state = AppState::new(
        Arc::new(InMemoryTaskStore::new()),
        Some(llm),
        sessions,
        config.chat.clone(),
        RateLimiter::new(config.rate_limit),
    );

    for i in 0..15 {
        let (status, _) = post_chat(&state, &format!(r#"{{"sessionId":"u1","message":"m{i}"}}"#)).await;
        assert_eq!(status, StatusCode::OK, "exchange {i}");
    }

    let history = state.sessions.history("u1");
    assert_eq!(history.len(), 21);
    assert_eq!(history[0], Message::system(config.chat.system_prompt.as_str()));
    assert_eq!(history[1], Message::user("m5"));
    assert_eq!(history[20], Message::assistant("echo: m14"));
}

#[tokio::test]
async fn delete_forgets_session() {
    let state = test_helpers::test_app_state_with_llm(Arc::new(MockLlm::replying("ok")));
    post_chat(&state, r#"{"sessionId":"u1","message":"a"}"#).await;
    assert_eq!(state.sessions.session_count(), 1);

    for _ in 0..2 {
        let req = Request::builder()
            .method("DELETE")
            .uri("/api/ai/chat/u1")
            .body(Body::empty())
            .unwrap();
        let resp = app(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
    assert_eq!(state.sessions.session_count(), 0);
}
