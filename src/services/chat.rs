//! Chat service: session-bounded relay in front of the LLM provider.
//!
//! DESIGN
//! ======
//! One call per HTTP request: validate, rate-limit, snapshot the session
//! history, call the LLM with `[system, prior turns.., user]`, and only on
//! success append the exchange to the stored history. The session lock is
//! never held across the LLM call, so a slow upstream stalls only its own
//! request.
//!
//! ERROR HANDLING
//! ==============
//! Every failure path returns before `record_exchange`, so a failed request
//! leaves the session exactly as it was.

use tracing::{info, warn};

use crate::frame::ErrorCode;
use crate::llm::types::{LlmError, Message};
use crate::rate_limit::RateLimitError;
use crate::state::AppState;

/// Session key used when the request names none.
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// Fixed generation parameters for every chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl ChatSettings {
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: Self::DEFAULT_TEMPERATURE,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            system_prompt: crate::config::DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("LLM not configured")]
    NotConfigured,
    #[error("rate limited: {0}")]
    RateLimited(#[from] RateLimitError),
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("LLM returned an empty reply")]
    EmptyReply,
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "E_EMPTY_MESSAGE",
            Self::NotConfigured => "E_LLM_NOT_CONFIGURED",
            Self::RateLimited(_) => "E_RATE_LIMITED",
            Self::Llm(_) => "E_LLM_ERROR",
            Self::EmptyReply => "E_EMPTY_REPLY",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Llm(e) => e.retryable(),
            _ => false,
        }
    }
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Map an optional client-supplied session id to a store key.
#[must_use]
pub fn session_key(session_id: Option<&str>) -> &str {
    match session_id.map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => ANONYMOUS_SESSION,
    }
}

/// Send one user message on a session and return the assistant reply.
///
/// # Errors
///
/// Returns [`ChatError`] for a blank message, a missing LLM client, a rate
/// limit hit, or any upstream failure. The session is untouched on error.
pub async fn send_message(state: &AppState, session_id: Option<&str>, message: &str) -> Result<String, ChatError> {
    if message.trim().is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    let key = session_key(session_id);
    let llm = state.llm.as_ref().ok_or(ChatError::NotConfigured)?;

    state.rate_limiter.check_and_record(key)?;

    let mut messages = state.sessions.history(key);
    let prior_turns = messages.len();
    messages.push(Message::user(message));

    info!(session = %key, prior_turns, message_len = message.len(), model = llm.model(), "chat: forwarding to LLM");

    let response = llm
        .chat(state.chat.max_tokens, state.chat.temperature, &messages)
        .await
        .inspect_err(|e| warn!(session = %key, error = %e, "chat: LLM call failed"))?;

    let reply = response.text();
    if reply.trim().is_empty() {
        warn!(session = %key, stop_reason = %response.stop_reason, "chat: LLM returned no text");
        return Err(ChatError::EmptyReply);
    }

    let turns = state.sessions.record_exchange(key, message, &reply);
    info!(
        session = %key,
        turns,
        model = %response.model,
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "chat: exchange recorded"
    );
    Ok(reply)
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
