//! Chat session store: bounded in-memory conversation histories.
//!
//! DESIGN
//! ======
//! One `ChatSession` per session key, each an ordered list of turns whose
//! first entry is always the system instruction. The store is a cloneable
//! handle injected through `AppState`; the std mutex is only held for map
//! edits and never across an await.
//!
//! Histories are capped by chunked pruning: once a session exceeds
//! `max_turns`, the oldest `prune_turns` non-system turns are dropped until
//! it fits. The map itself is capped by `max_sessions` (least recently used
//! goes first) and optionally by an idle TTL enforced by the sweeper.
//!
//! TRADE-OFFS
//! ==========
//! Sessions are lost on restart. Readers take a snapshot and the writer
//! appends to whatever is stored when the reply lands, so two concurrent
//! requests on one session both keep their exchange.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::llm::types::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Turn cap per session, system turn included.
    pub max_turns: usize,
    /// Turns removed per pruning step.
    pub prune_turns: usize,
    pub max_sessions: usize,
    /// Idle expiry. `None` keeps sessions for the process lifetime.
    pub idle_ttl: Option<Duration>,
}

impl SessionConfig {
    pub const DEFAULT_MAX_TURNS: usize = 30;
    pub const DEFAULT_PRUNE_TURNS: usize = 10;
    pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: Self::DEFAULT_MAX_TURNS,
            prune_turns: Self::DEFAULT_PRUNE_TURNS,
            max_sessions: Self::DEFAULT_MAX_SESSIONS,
            idle_ttl: None,
        }
    }
}

struct ChatSession {
    turns: Vec<Message>,
    last_used: Instant,
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, ChatSession>>>,
    config: SessionConfig,
    system_prompt: Arc<str>,
}

impl SessionStore {
    #[must_use]
    pub fn new(config: SessionConfig, system_prompt: impl Into<String>) -> Self {
        let system_prompt: String = system_prompt.into();
        Self { inner: Arc::new(Mutex::new(HashMap::new())), config, system_prompt: system_prompt.into() }
    }

    /// Snapshot of the stored turns, or just the system turn for an
    /// unknown session. Does not create the session.
    #[must_use]
    pub fn history(&self, key: &str) -> Vec<Message> {
        let sessions = self.lock();
        match sessions.get(key) {
            Some(session) => session.turns.clone(),
            None => vec![self.seed()],
        }
    }

    /// Append a completed exchange to the current history, seeding the
    /// session if needed, then trim. Returns the resulting turn count.
    pub fn record_exchange(&self, key: &str, user: &str, reply: &str) -> usize {
        self.record_exchange_at(key, user, reply, Instant::now())
    }

    fn record_exchange_at(&self, key: &str, user: &str, reply: &str, now: Instant) -> usize {
        let mut sessions = self.lock();
        if !sessions.contains_key(key) && sessions.len() >= self.config.max_sessions.max(1) {
            evict_least_recent(&mut sessions);
        }
        let session = sessions
            .entry(key.to_owned())
            .or_insert_with(|| ChatSession { turns: vec![self.seed()], last_used: now });
        session.turns.push(Message::user(user));
        session.turns.push(Message::assistant(reply));
        trim_history(&mut session.turns, self.config.max_turns, self.config.prune_turns);
        session.last_used = now;
        session.turns.len()
    }

    /// Drop a session. Returns whether it existed.
    pub fn forget(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Remove sessions idle for longer than the TTL. Returns how many went.
    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now())
    }

    fn prune_expired_at(&self, now: Instant) -> usize {
        let Some(ttl) = self.config.idle_ttl else {
            return 0;
        };
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_used) <= ttl);
        before - sessions.len()
    }

    fn seed(&self) -> Message {
        Message::system(self.system_prompt.as_ref())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChatSession>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// While the history exceeds `cap`, remove up to `chunk` turns right after
/// the leading system turn. Both bounds are clamped to at least 1.
pub fn trim_history(turns: &mut Vec<Message>, cap: usize, chunk: usize) {
    let cap = cap.max(1);
    let chunk = chunk.max(1);
    while turns.len() > cap {
        let end = (1 + chunk).min(turns.len());
        turns.drain(1..end);
    }
}

fn evict_least_recent(sessions: &mut HashMap<String, ChatSession>) {
    let oldest = sessions
        .iter()
        .min_by_key(|(_, s)| s.last_used)
        .map(|(k, _)| k.clone());
    if let Some(key) = oldest {
        sessions.remove(&key);
        tracing::debug!(session = %key, "evicted least recently used chat session");
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
