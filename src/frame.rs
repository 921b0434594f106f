//! Frame: the socket message envelope for the task relay.
//!
//! ARCHITECTURE
//! ============
//! Every message on the relay socket is a Frame: a named event plus a flat
//! JSON payload. Clients emit mutation events (`addTask`, `taskMoved`, ...),
//! the server answers with full task-list pushes (`loadTasks`,
//! `updateOrgTasks`, ...) or an `error` frame addressed to the sender only.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - `id` and `ts` are optional on inbound frames; the server fills them in.
//! - The WS handler routes on `event` and leaves payload parsing to the
//!   relay service.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Event name for error frames sent back to a single client.
pub const EVENT_ERROR: &str = "error";

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

/// Frame data key naming the event that caused an error.
pub const FRAME_EVENT: &str = "event";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// The socket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default = "now_ms")]
    pub ts: i64,
    pub event: String,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a frame for a named event.
    pub fn new(event: impl Into<String>, data: Data) -> Self {
        Self { id: Uuid::new_v4(), ts: now_ms(), event: event.into(), data }
    }

    /// Create a structured error frame answering this one, from a typed error.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        error_frame(&self.event, err)
    }
}

/// Build a structured error frame for `event` without an inbound frame,
/// e.g. when the initial load on connect fails.
pub fn error_frame(event: &str, err: &(impl ErrorCode + ?Sized)) -> Frame {
    Frame::new(EVENT_ERROR, Data::new())
        .with_data(FRAME_EVENT, event)
        .with_data(FRAME_CODE, err.error_code())
        .with_data(FRAME_MESSAGE, err.to_string())
        .with_data(FRAME_RETRYABLE, err.retryable())
}

// =============================================================================
// BUILDERS & ACCESSORS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// String field from the payload, if present and a string.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
