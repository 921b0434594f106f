//! Task store: the seam between the relay and the external platform.
//!
//! DESIGN
//! ======
//! Tasks are owned by the hosted platform. The relay never keeps a durable
//! copy; it writes through [`TaskStore`] and reloads the full scope list
//! after every mutation. Three backends implement the trait:
//! - [`rest::RestTaskStore`]: the platform's PostgREST API (default).
//! - [`postgres::PgTaskStore`]: direct SQL against the platform database.
//! - [`memory::InMemoryTaskStore`]: process-local, for development and tests.
//!
//! Every write is filtered by scope, so a client can only touch tasks on
//! the board it is subscribed to.

pub mod memory;
pub mod postgres;
pub mod rest;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// TASK
// =============================================================================

/// Kanban column of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Progress,
    Done,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Progress => "progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "progress" => Ok(Self::Progress),
            "done" => Ok(Self::Done),
            other => Err(TaskError::InvalidStatus(other.to_owned())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task row. Field names mirror the platform's `tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    pub user_id: Uuid,
    #[serde(default)]
    pub org_id: Option<Uuid>,
}

/// Insert payload. `id` is assigned by the store.
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub user_id: Uuid,
    pub org_id: Option<Uuid>,
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl TaskPatch {
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self { status: Some(status), title: None }
    }

    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self { status: None, title: Some(title.into()) }
    }

    fn apply(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
    }
}

// =============================================================================
// SCOPE
// =============================================================================

/// Broadcast partition: one user's personal board or an organisation board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Personal(Uuid),
    Org(Uuid),
}

impl Scope {
    /// Resolve the scope a client identity subscribes to.
    #[must_use]
    pub fn for_identity(user_id: Uuid, org_id: Option<Uuid>) -> Self {
        match org_id {
            Some(org_id) => Self::Org(org_id),
            None => Self::Personal(user_id),
        }
    }

    /// Organisation id carried by tasks created in this scope.
    #[must_use]
    pub fn org_id(self) -> Option<Uuid> {
        match self {
            Self::Personal(_) => None,
            Self::Org(org_id) => Some(org_id),
        }
    }

    /// Whether `task` belongs to this scope.
    #[must_use]
    pub fn contains(self, task: &Task) -> bool {
        match self {
            Self::Personal(user_id) => task.user_id == user_id && task.org_id.is_none(),
            Self::Org(org_id) => task.org_id == Some(org_id),
        }
    }

    /// Event pushed to a client right after it subscribes.
    #[must_use]
    pub fn load_event(self) -> &'static str {
        match self {
            Self::Personal(_) => "loadTasks",
            Self::Org(_) => "loadOrgTasks",
        }
    }

    /// Event broadcast to every subscriber after a mutation.
    #[must_use]
    pub fn update_event(self) -> &'static str {
        match self {
            Self::Personal(_) => "updateTasks",
            Self::Org(_) => "updateOrgTasks",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Personal(user_id) => write!(f, "user:{user_id}"),
            Self::Org(org_id) => write!(f, "org:{org_id}"),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(Uuid),
    #[error("invalid task status: {0}")]
    InvalidStatus(String),
    #[error("platform request failed: {0}")]
    Request(String),
    #[error("platform responded with status {status}")]
    Platform { status: u16, body: String },
    #[error("platform response parse failed: {0}")]
    Parse(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl crate::frame::ErrorCode for TaskError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_TASK_NOT_FOUND",
            Self::InvalidStatus(_) => "E_INVALID_STATUS",
            Self::Request(_) => "E_PLATFORM_REQUEST",
            Self::Platform { .. } => "E_PLATFORM_RESPONSE",
            Self::Parse(_) => "E_PLATFORM_PARSE",
            Self::Database(_) => "E_DATABASE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Platform { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Write-through access to the platform's task table. Enables mocking in tests.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks of a scope, oldest first.
    async fn list(&self, scope: Scope) -> Result<Vec<Task>, TaskError>;

    /// Insert a task and return the stored row.
    async fn insert(&self, task: NewTask) -> Result<Task, TaskError>;

    /// Patch a task inside `scope`. [`TaskError::NotFound`] if no row matched.
    async fn update(&self, scope: Scope, task_id: Uuid, patch: TaskPatch) -> Result<Task, TaskError>;

    /// Delete a task inside `scope`. [`TaskError::NotFound`] if no row matched.
    async fn delete(&self, scope: Scope, task_id: Uuid) -> Result<(), TaskError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
