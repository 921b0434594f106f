//! Relay service: scope registry, task mutations, and full-list fan-out.
//!
//! DESIGN
//! ======
//! Clients subscribe to exactly one scope (a personal board or an
//! organisation board). Every mutation is written through the task store,
//! then the scope's full task list is reloaded and pushed to every
//! subscriber, the sender included. Clients never merge diffs; the last
//! list they received is the board.
//!
//! ORDERING
//! ========
//! Write → reload → broadcast runs under the scope's mutation lock, so
//! broadcasts leave in write order and every client ends on the list that
//! matches the store's final state. The registry `RwLock` is only taken
//! for map edits and the non-blocking fan-out, never across store I/O.
//! Conflicting writes are not detected: the last write to land wins.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame};
use crate::state::{AppState, ScopeState};
use crate::store::{NewTask, Scope, Task, TaskError, TaskPatch, TaskStatus};

pub const EVENT_ADD_TASK: &str = "addTask";
pub const EVENT_TASK_MOVED: &str = "taskMoved";
pub const EVENT_RENAME_TASK: &str = "renameTask";
pub const EVENT_DELETE_TASK: &str = "deleteTask";
pub const EVENT_REJOIN: &str = "rejoin";

/// Frame data key carrying the full task list.
pub const FRAME_TASKS: &str = "tasks";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("invalid frame: {0}")]
    Malformed(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("not subscribed to {0}")]
    NotSubscribed(Scope),
    #[error("write applied, refresh failed: {0}")]
    RefreshFailed(TaskError),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Task(e) => e.error_code(),
            Self::Malformed(_) => "E_INVALID_FRAME",
            Self::MissingField(_) => "E_MISSING_FIELD",
            Self::InvalidField { .. } => "E_INVALID_FIELD",
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
            Self::NotSubscribed(_) => "E_NOT_SUBSCRIBED",
            Self::RefreshFailed(_) => "E_REFRESH_FAILED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Task(e) if e.retryable())
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// A validated client mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskMutation {
    Add {
        title: String,
        description: Option<String>,
        priority: Option<String>,
        status: TaskStatus,
        assigned_to: Option<Uuid>,
    },
    Move { task_id: Uuid, status: TaskStatus },
    Rename { task_id: Uuid, title: String },
    Delete { task_id: Uuid },
}

impl TaskMutation {
    /// Parse and validate a mutation frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] for a non-mutation event or a missing or
    /// malformed field.
    pub fn from_frame(frame: &Frame) -> Result<Self, RelayError> {
        match frame.event.as_str() {
            EVENT_ADD_TASK => Ok(Self::Add {
                title: required_text(frame, "title")?,
                description: optional_text(frame, "description"),
                priority: optional_text(frame, "priority"),
                status: match optional_text(frame, "status") {
                    Some(raw) => raw.parse()?,
                    None => TaskStatus::Todo,
                },
                assigned_to: optional_uuid(frame, "assignedTo")?,
            }),
            EVENT_TASK_MOVED => Ok(Self::Move {
                task_id: required_uuid(frame, "taskId")?,
                status: required_text(frame, "newStatus")?.parse()?,
            }),
            EVENT_RENAME_TASK => Ok(Self::Rename {
                task_id: required_uuid(frame, "taskId")?,
                title: required_text(frame, "newTitle")?,
            }),
            EVENT_DELETE_TASK => Ok(Self::Delete { task_id: required_uuid(frame, "taskId")? }),
            other => Err(RelayError::UnknownEvent(other.to_owned())),
        }
    }
}

/// Parse a `rejoin` frame into the requested identity `(user_id, org_id)`.
///
/// # Errors
///
/// Returns [`RelayError`] if `userId` is missing or either id is not a uuid.
pub fn parse_rejoin(frame: &Frame) -> Result<(Uuid, Option<Uuid>), RelayError> {
    Ok((required_uuid(frame, "userId")?, optional_uuid(frame, "orgId")?))
}

fn required_text(frame: &Frame, field: &'static str) -> Result<String, RelayError> {
    optional_text(frame, field).ok_or(RelayError::MissingField(field))
}

/// Trimmed string field; blank counts as absent.
fn optional_text(frame: &Frame, field: &str) -> Option<String> {
    frame
        .str_field(field)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn required_uuid(frame: &Frame, field: &'static str) -> Result<Uuid, RelayError> {
    optional_uuid(frame, field)?.ok_or(RelayError::MissingField(field))
}

fn optional_uuid(frame: &Frame, field: &'static str) -> Result<Option<Uuid>, RelayError> {
    match frame.data.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .and_then(|s| s.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| RelayError::InvalidField { field, value: value.to_string() }),
    }
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Register a client in a scope, creating the scope if needed.
pub async fn join_scope(state: &AppState, scope: Scope, client_id: Uuid, tx: mpsc::Sender<Frame>) {
    let mut scopes = state.scopes.write().await;
    let scope_state = scopes.entry(scope).or_insert_with(ScopeState::new);
    scope_state.clients.insert(client_id, tx);
    info!(%scope, %client_id, clients = scope_state.clients.len(), "client joined scope");
}

/// Remove a client from a scope. The last client out evicts the scope.
pub async fn part_scope(state: &AppState, scope: Scope, client_id: Uuid) {
    let mut scopes = state.scopes.write().await;
    let Some(scope_state) = scopes.get_mut(&scope) else {
        return;
    };
    scope_state.clients.remove(&client_id);
    info!(%scope, %client_id, remaining = scope_state.clients.len(), "client left scope");

    if scope_state.clients.is_empty() {
        let cached = scope_state.tasks.as_ref().map_or(0, Vec::len);
        scopes.remove(&scope);
        info!(%scope, cached, "evicted scope from memory");
    }
}

// =============================================================================
// LOAD
// =============================================================================

/// Build a frame carrying the full task list under `event`.
#[must_use]
pub fn tasks_frame(event: &str, tasks: &[Task]) -> Frame {
    let mut data = Data::new();
    data.insert(FRAME_TASKS.into(), json!(tasks));
    Frame::new(event, data)
}

/// Load the scope's tasks and push the load event to one client.
///
/// Runs under the scope's mutation lock so the load cannot overtake a
/// broadcast already in flight. If the store is unreachable but the scope
/// already holds a list from an earlier load or broadcast, that list is
/// pushed instead. Returns the number of tasks pushed.
///
/// # Errors
///
/// Returns [`RelayError::NotSubscribed`] if the scope is not live, or the
/// store error if the list cannot be loaded and nothing is cached.
pub async fn send_load(state: &AppState, scope: Scope, client_id: Uuid) -> Result<usize, RelayError> {
    let lock = mutation_lock(state, scope).await?;
    let _guard = lock.lock().await;

    let loaded = state.tasks.list(scope).await;

    let mut scopes = state.scopes.write().await;
    let Some(scope_state) = scopes.get_mut(&scope) else {
        return Err(RelayError::NotSubscribed(scope));
    };
    let frame = match loaded {
        Ok(tasks) => {
            let frame = tasks_frame(scope.load_event(), &tasks);
            scope_state.tasks = Some(tasks);
            frame
        }
        Err(e) => {
            let Some(cached) = &scope_state.tasks else {
                return Err(e.into());
            };
            warn!(%scope, %client_id, error = %e, cached = cached.len(), "load failed; serving cached task list");
            tasks_frame(scope.load_event(), cached)
        }
    };
    let count = scope_state.tasks.as_ref().map_or(0, Vec::len);
    if let Some(tx) = scope_state.clients.get(&client_id) {
        if tx.try_send(frame).is_err() {
            warn!(%scope, %client_id, "client channel full or closed; load dropped");
        }
    }
    info!(%scope, %client_id, count, event = scope.load_event(), "pushed task list");
    Ok(count)
}

// =============================================================================
// MUTATE
// =============================================================================

/// Apply a mutation for `user_id` in `scope`, then reload and broadcast the
/// scope's full task list to every subscriber. Returns the new list.
///
/// # Errors
///
/// Returns [`RelayError`] if the scope is not live or the write fails; on
/// those errors nothing is broadcast and the cached list is unchanged. If
/// the write lands but the reload fails, returns
/// [`RelayError::RefreshFailed`] and drops the cached list, since it no
/// longer matches the store.
pub async fn apply_mutation(
    state: &AppState,
    scope: Scope,
    user_id: Uuid,
    mutation: TaskMutation,
) -> Result<Vec<Task>, RelayError> {
    let lock = mutation_lock(state, scope).await?;
    let _guard = lock.lock().await;

    match mutation {
        TaskMutation::Add { title, description, priority, status, assigned_to } => {
            let task = state
                .tasks
                .insert(NewTask { title, description, status, priority, assigned_to, user_id, org_id: scope.org_id() })
                .await?;
            info!(%scope, task_id = %task.id, "task added");
        }
        TaskMutation::Move { task_id, status } => {
            state
                .tasks
                .update(scope, task_id, TaskPatch::status(status))
                .await?;
            info!(%scope, %task_id, %status, "task moved");
        }
        TaskMutation::Rename { task_id, title } => {
            state
                .tasks
                .update(scope, task_id, TaskPatch::title(title))
                .await?;
            info!(%scope, %task_id, "task renamed");
        }
        TaskMutation::Delete { task_id } => {
            state.tasks.delete(scope, task_id).await?;
            info!(%scope, %task_id, "task deleted");
        }
    }

    let refreshed = state.tasks.list(scope).await;
    let tasks = {
        let mut scopes = state.scopes.write().await;
        let cached = scopes.get_mut(&scope).map(|s| &mut s.tasks);
        match refreshed {
            Ok(tasks) => {
                if let Some(cached) = cached {
                    *cached = Some(tasks.clone());
                }
                tasks
            }
            Err(e) => {
                warn!(%scope, error = %e, "write applied, refresh failed");
                if let Some(cached) = cached {
                    *cached = None;
                }
                return Err(RelayError::RefreshFailed(e));
            }
        }
    };
    broadcast(state, scope, &tasks_frame(scope.update_event(), &tasks)).await;
    Ok(tasks)
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to every client in a scope, the sender included.
pub async fn broadcast(state: &AppState, scope: Scope, frame: &Frame) {
    let scopes = state.scopes.read().await;
    let Some(scope_state) = scopes.get(&scope) else {
        return;
    };

    for (client_id, tx) in &scope_state.clients {
        // Best-effort: if a client's channel is full, skip it.
        if tx.try_send(frame.clone()).is_err() {
            warn!(%scope, %client_id, event = %frame.event, "client channel full or closed; frame dropped");
        }
    }
}

async fn mutation_lock(state: &AppState, scope: Scope) -> Result<Arc<Mutex<()>>, RelayError> {
    let scopes = state.scopes.read().await;
    scopes
        .get(&scope)
        .map(|s| Arc::clone(&s.mutation_lock))
        .ok_or(RelayError::NotSubscribed(scope))
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
