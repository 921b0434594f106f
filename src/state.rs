//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the task store, the live scope registry for the relay, the
//! chat session store, and the optional LLM client. Each scope keeps its
//! connected clients, the last task list it broadcast, and a mutation lock
//! that serializes write → reload → broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::frame::Frame;
use crate::llm::LlmChat;
use crate::rate_limit::RateLimiter;
use crate::services::chat::ChatSettings;
use crate::services::session::SessionStore;
use crate::store::{Scope, Task, TaskStore};

// =============================================================================
// SCOPE STATE
// =============================================================================

/// Per-scope live state. Exists only while at least one client is connected.
pub struct ScopeState {
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Task list from the most recent load or broadcast. `None` until the
    /// first successful load, and again after a refresh fails.
    pub tasks: Option<Vec<Task>>,
    /// Held for the whole write → reload → broadcast sequence.
    pub mutation_lock: Arc<Mutex<()>>,
}

impl ScopeState {
    #[must_use]
    pub fn new() -> Self {
        Self { clients: HashMap::new(), tasks: None, mutation_lock: Arc::new(Mutex::new(())) }
    }
}

impl Default for ScopeState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub scopes: Arc<RwLock<HashMap<Scope, ScopeState>>>,
    pub tasks: Arc<dyn TaskStore>,
    /// Optional LLM client. `None` if LLM env vars are not configured.
    pub llm: Option<Arc<dyn LlmChat>>,
    pub sessions: SessionStore,
    pub chat: Arc<ChatSettings>,
    /// In-memory rate limiter for chat requests.
    pub rate_limiter: RateLimiter,
}

impl AppState {
    #[must_use]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        llm: Option<Arc<dyn LlmChat>>,
        sessions: SessionStore,
        chat: ChatSettings,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self { scopes: Arc::new(RwLock::new(HashMap::new())), tasks, llm, sessions, chat: Arc::new(chat), rate_limiter }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
