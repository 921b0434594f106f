//! In-memory rate limiting for chat requests.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<String, VecDeque<Instant>>`.
//! Two limits are enforced before any upstream LLM call:
//! - Per-session: requests per session key per window
//! - Global: requests across all sessions per window
//!
//! A limit of 0 disables that check; both are disabled by default. A
//! rejected request is not recorded, so it does not extend the window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_PER_SESSION_LIMIT: usize = 0;
const DEFAULT_PER_SESSION_WINDOW_SECS: u64 = 60;

const DEFAULT_GLOBAL_LIMIT: usize = 0;
const DEFAULT_GLOBAL_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_session_limit: usize,
    pub per_session_window: Duration,
    pub global_limit: usize,
    pub global_window: Duration,
}

impl RateLimitConfig {
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.per_session_limit == 0 && self.global_limit == 0
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_session_limit: DEFAULT_PER_SESSION_LIMIT,
            per_session_window: Duration::from_secs(DEFAULT_PER_SESSION_WINDOW_SECS),
            global_limit: DEFAULT_GLOBAL_LIMIT,
            global_window: Duration::from_secs(DEFAULT_GLOBAL_WINDOW_SECS),
        }
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("per-session rate limit exceeded (max {limit} requests/{window_secs}s)")]
    PerSessionExceeded { limit: usize, window_secs: u64 },
    #[error("global rate limit exceeded (max {limit} requests/{window_secs}s)")]
    GlobalExceeded { limit: usize, window_secs: u64 },
}

impl crate::frame::ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::PerSessionExceeded { .. } => "E_RATE_LIMIT_SESSION",
            Self::GlobalExceeded { .. } => "E_RATE_LIMIT_GLOBAL",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    config: RateLimitConfig,
}

#[derive(Default)]
struct RateLimiterInner {
    /// Per-session request timestamps.
    session_requests: HashMap<String, VecDeque<Instant>>,
    /// Global request timestamps.
    global_requests: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(RateLimiterInner::default())), config }
    }

    /// Check both per-session and global rate limits, then record the request.
    ///
    /// # Errors
    ///
    /// Returns the first limit that would be exceeded.
    pub fn check_and_record(&self, session_key: &str) -> Result<(), RateLimitError> {
        self.check_and_record_at(session_key, Instant::now())
    }

    /// Internal: check + record with explicit timestamp (for testing).
    fn check_and_record_at(&self, session_key: &str, now: Instant) -> Result<(), RateLimitError> {
        if self.config.is_disabled() {
            return Ok(());
        }
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cfg = self.config;

        // Prune and check global first (no borrow conflict).
        prune_window(&mut inner.global_requests, now, cfg.global_window);
        if cfg.global_limit > 0 && inner.global_requests.len() >= cfg.global_limit {
            return Err(RateLimitError::GlobalExceeded {
                limit: cfg.global_limit,
                window_secs: cfg.global_window.as_secs(),
            });
        }

        // Idle sessions drop out of the map once their window is empty.
        inner
            .session_requests
            .retain(|_, deque| {
                prune_window(deque, now, cfg.per_session_window);
                !deque.is_empty()
            });

        let session_deque = inner
            .session_requests
            .entry(session_key.to_owned())
            .or_default();
        if cfg.per_session_limit > 0 && session_deque.len() >= cfg.per_session_limit {
            return Err(RateLimitError::PerSessionExceeded {
                limit: cfg.per_session_limit,
                window_secs: cfg.per_session_window.as_secs(),
            });
        }

        session_deque.push_back(now);
        inner.global_requests.push_back(now);
        Ok(())
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session_requests
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
