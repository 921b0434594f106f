use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::frame::EVENT_ERROR;
use crate::state::test_helpers::{self, FailingTaskStore, dummy_task};
use crate::store::TaskStore;
use crate::store::memory::InMemoryTaskStore;

fn frame(event: &str, data: serde_json::Value) -> Frame {
    let data = data
        .as_object()
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default();
    Frame::new(event, data)
}

fn tasks_of(frame: &Frame) -> Vec<Task> {
    serde_json::from_value(frame.data[FRAME_TASKS].clone()).unwrap()
}

async fn joined(state: &AppState, scope: Scope) -> (Uuid, mpsc::Receiver<Frame>) {
    let client_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(16);
    join_scope(state, scope, client_id, tx).await;
    (client_id, rx)
}

/// In-memory store whose `list` can be taken down, directly or by the next write.
#[derive(Default)]
struct FlakyListStore {
    inner: InMemoryTaskStore,
    list_down: AtomicBool,
    down_after_write: AtomicBool,
}

impl FlakyListStore {
    fn wrote(&self) {
        if self.down_after_write.load(Ordering::SeqCst) {
            self.list_down.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl TaskStore for FlakyListStore {
    async fn list(&self, scope: Scope) -> Result<Vec<Task>, TaskError> {
        if self.list_down.load(Ordering::SeqCst) {
            return Err(TaskError::Platform { status: 503, body: "list down".into() });
        }
        self.inner.list(scope).await
    }

    async fn insert(&self, task: NewTask) -> Result<Task, TaskError> {
        let task = self.inner.insert(task).await?;
        self.wrote();
        Ok(task)
    }

    async fn update(&self, scope: Scope, task_id: Uuid, patch: TaskPatch) -> Result<Task, TaskError> {
        let task = self.inner.update(scope, task_id, patch).await?;
        self.wrote();
        Ok(task)
    }

    async fn delete(&self, scope: Scope, task_id: Uuid) -> Result<(), TaskError> {
        self.inner.delete(scope, task_id).await?;
        self.wrote();
        Ok(())
    }
}

// =============================================================================
// join / part
// =============================================================================

#[tokio::test]
async fn last_part_evicts_scope() {
    let state = test_helpers::test_app_state();
    let scope = Scope::Personal(Uuid::new_v4());
    let (a, _rx_a) = joined(&state, scope).await;
    let (b, _rx_b) = joined(&state, scope).await;

    part_scope(&state, scope, a).await;
    assert_eq!(state.scopes.read().await[&scope].clients.len(), 1);

    part_scope(&state, scope, b).await;
    assert!(!state.scopes.read().await.contains_key(&scope));

    // Parting an unknown scope is a no-op.
    part_scope(&state, scope, b).await;
}

// =============================================================================
// load
// =============================================================================

#[tokio::test]
async fn load_pushes_only_scope_tasks() {
    let user = Uuid::new_v4();
    let org = Uuid::new_v4();
    let store = InMemoryTaskStore::with_tasks(vec![
        dummy_task(user, None, "mine"),
        dummy_task(user, Some(org), "team"),
        dummy_task(Uuid::new_v4(), None, "someone else"),
    ]);
    let state = test_helpers::test_app_state_with_store(Arc::new(store));

    let personal = Scope::Personal(user);
    let (client, mut rx) = joined(&state, personal).await;
    assert_eq!(send_load(&state, personal, client).await.unwrap(), 1);
    let pushed = rx.try_recv().unwrap();
    assert_eq!(pushed.event, "loadTasks");
    assert_eq!(tasks_of(&pushed)[0].title, "mine");

    let org_scope = Scope::Org(org);
    let (client, mut rx) = joined(&state, org_scope).await;
    send_load(&state, org_scope, client).await.unwrap();
    let pushed = rx.try_recv().unwrap();
    assert_eq!(pushed.event, "loadOrgTasks");
    assert_eq!(tasks_of(&pushed)[0].title, "team");
}

#[tokio::test]
async fn load_goes_to_requester_only() {
    let user = Uuid::new_v4();
    let state = test_helpers::test_app_state();
    let scope = Scope::Personal(user);
    let (_a, mut rx_a) = joined(&state, scope).await;
    let (b, mut rx_b) = joined(&state, scope).await;

    send_load(&state, scope, b).await.unwrap();
    assert!(rx_a.try_recv().is_err());
    assert_eq!(rx_b.try_recv().unwrap().event, "loadTasks");
}

#[tokio::test]
async fn repeated_load_is_idempotent() {
    let user = Uuid::new_v4();
    let store = InMemoryTaskStore::with_tasks(vec![dummy_task(user, None, "a"), dummy_task(user, None, "b")]);
    let state = test_helpers::test_app_state_with_store(Arc::new(store));
    let scope = Scope::Personal(user);
    let (client, mut rx) = joined(&state, scope).await;

    send_load(&state, scope, client).await.unwrap();
    let first = tasks_of(&rx.try_recv().unwrap());
    send_load(&state, scope, client).await.unwrap();
    let second = tasks_of(&rx.try_recv().unwrap());
    assert_eq!(first, second);
}

#[tokio::test]
async fn load_failure_keeps_client_subscribed() {
    let state = test_helpers::test_app_state_with_store(Arc::new(FailingTaskStore));
    let scope = Scope::Personal(Uuid::new_v4());
    let (client, mut rx) = joined(&state, scope).await;

    let err = send_load(&state, scope, client).await.unwrap_err();
    assert!(err.retryable());
    assert!(rx.try_recv().is_err());
    assert!(state.scopes.read().await[&scope].clients.contains_key(&client));
}

#[tokio::test]
async fn load_requires_live_scope() {
    let state = test_helpers::test_app_state();
    let scope = Scope::Personal(Uuid::new_v4());
    let err = send_load(&state, scope, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, RelayError::NotSubscribed(s) if s == scope));
}

// =============================================================================
// mutations
// =============================================================================

#[tokio::test]
async fn add_broadcasts_full_list_to_everyone() {
    let user = Uuid::new_v4();
    let state = test_helpers::test_app_state();
    let scope = Scope::Personal(user);
    let (_a, mut rx_a) = joined(&state, scope).await;
    let (_b, mut rx_b) = joined(&state, scope).await;

    let mutation = TaskMutation::from_frame(&frame(EVENT_ADD_TASK, json!({"title": "ship it"}))).unwrap();
    let tasks = apply_mutation(&state, scope, user, mutation).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Todo);
    assert_eq!(tasks[0].user_id, user);

    for rx in [&mut rx_a, &mut rx_b] {
        let update = rx.try_recv().unwrap();
        assert_eq!(update.event, "updateTasks");
        assert_eq!(tasks_of(&update), tasks);
    }
    assert_eq!(state.scopes.read().await[&scope].tasks.as_ref(), Some(&tasks));
}

#[tokio::test]
async fn org_add_sets_org_and_uses_org_event() {
    let user = Uuid::new_v4();
    let org = Uuid::new_v4();
    let state = test_helpers::test_app_state();
    let scope = Scope::Org(org);
    let (_c, mut rx) = joined(&state, scope).await;

    let mutation = TaskMutation::Add {
        title: "plan".into(),
        description: Some("q3".into()),
        priority: Some("high".into()),
        status: TaskStatus::Progress,
        assigned_to: Some(user),
    };
    let tasks = apply_mutation(&state, scope, user, mutation).await.unwrap();
    assert_eq!(tasks[0].org_id, Some(org));
    assert_eq!(tasks[0].assigned_to, Some(user));
    assert_eq!(rx.try_recv().unwrap().event, "updateOrgTasks");
}

#[tokio::test]
async fn move_rename_delete_round() {
    let user = Uuid::new_v4();
    let task = dummy_task(user, None, "draft");
    let task_id = task.id;
    let state = test_helpers::test_app_state_with_store(Arc::new(InMemoryTaskStore::with_tasks(vec![task])));
    let scope = Scope::Personal(user);
    let (_c, _rx) = joined(&state, scope).await;

    let tasks = apply_mutation(&state, scope, user, TaskMutation::Move { task_id, status: TaskStatus::Done })
        .await
        .unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Done);

    let tasks = apply_mutation(&state, scope, user, TaskMutation::Rename { task_id, title: "final".into() })
        .await
        .unwrap();
    assert_eq!(tasks[0].title, "final");

    let tasks = apply_mutation(&state, scope, user, TaskMutation::Delete { task_id })
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn task_outside_scope_is_not_found() {
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let task = dummy_task(owner, None, "private");
    let task_id = task.id;
    let state = test_helpers::test_app_state_with_store(Arc::new(InMemoryTaskStore::with_tasks(vec![task])));
    let scope = Scope::Personal(intruder);
    let (_c, mut rx) = joined(&state, scope).await;

    let err = apply_mutation(&state, scope, intruder, TaskMutation::Delete { task_id })
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Task(TaskError::NotFound(id)) if id == task_id));
    assert_eq!(err.error_code(), "E_TASK_NOT_FOUND");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn store_failure_broadcasts_nothing() {
    let user = Uuid::new_v4();
    let state = test_helpers::test_app_state_with_store(Arc::new(FailingTaskStore));
    let scope = Scope::Personal(user);
    let (_a, mut rx_a) = joined(&state, scope).await;
    let (_b, mut rx_b) = joined(&state, scope).await;

    let inbound = frame(EVENT_ADD_TASK, json!({"title": "x"}));
    let err = apply_mutation(&state, scope, user, TaskMutation::from_frame(&inbound).unwrap())
        .await
        .unwrap_err();
    let reply = inbound.error_from(&err);
    assert_eq!(reply.event, EVENT_ERROR);
    assert_eq!(reply.data["code"], "E_PLATFORM_RESPONSE");
    assert_eq!(reply.data["retryable"], true);

    assert!(rx_a.try_recv().is_err());
    assert!(rx_b.try_recv().is_err());
    assert!(state.scopes.read().await[&scope].tasks.is_none());
}

#[tokio::test]
async fn refresh_failure_after_write_reports_landed_write() {
    let user = Uuid::new_v4();
    let store = Arc::new(FlakyListStore::default());
    store.down_after_write.store(true, Ordering::SeqCst);
    let state = test_helpers::test_app_state_with_store(store.clone());
    let scope = Scope::Personal(user);
    let (a, mut rx_a) = joined(&state, scope).await;
    let (_b, mut rx_b) = joined(&state, scope).await;
    send_load(&state, scope, a).await.unwrap();
    rx_a.try_recv().unwrap();

    let inbound = frame(EVENT_ADD_TASK, json!({"title": "landed"}));
    let err = apply_mutation(&state, scope, user, TaskMutation::from_frame(&inbound).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::RefreshFailed(TaskError::Platform { status: 503, .. })));
    assert_eq!(err.error_code(), "E_REFRESH_FAILED");
    assert!(!err.retryable());
    assert!(err.to_string().starts_with("write applied, refresh failed"));

    assert!(rx_a.try_recv().is_err());
    assert!(rx_b.try_recv().is_err());
    assert!(state.scopes.read().await[&scope].tasks.is_none());

    let written = store.inner.list(scope).await.unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].title, "landed");
}

#[tokio::test]
async fn load_serves_cached_list_while_store_is_down() {
    let user = Uuid::new_v4();
    let task = dummy_task(user, None, "kept");
    let store = Arc::new(FlakyListStore { inner: InMemoryTaskStore::with_tasks(vec![task.clone()]), ..Default::default() });
    let state = test_helpers::test_app_state_with_store(store.clone());
    let scope = Scope::Personal(user);
    let (a, mut rx_a) = joined(&state, scope).await;
    assert_eq!(send_load(&state, scope, a).await.unwrap(), 1);
    rx_a.try_recv().unwrap();

    store.list_down.store(true, Ordering::SeqCst);
    let (b, mut rx_b) = joined(&state, scope).await;
    assert_eq!(send_load(&state, scope, b).await.unwrap(), 1);
    let load = rx_b.try_recv().unwrap();
    assert_eq!(load.event, "loadTasks");
    assert_eq!(tasks_of(&load), vec![task]);
}

#[tokio::test]
async fn racing_moves_converge_on_store_state() {
    let user = Uuid::new_v4();
    let task = dummy_task(user, None, "contested");
    let task_id = task.id;
    let store = Arc::new(InMemoryTaskStore::with_tasks(vec![task]));
    let state = test_helpers::test_app_state_with_store(store.clone());
    let scope = Scope::Personal(user);
    let (_a, mut rx_a) = joined(&state, scope).await;
    let (_b, mut rx_b) = joined(&state, scope).await;

    let s1 = state.clone();
    let s2 = state.clone();
    let m1 = tokio::spawn(async move {
        apply_mutation(&s1, scope, user, TaskMutation::Move { task_id, status: TaskStatus::Progress }).await
    });
    let m2 = tokio::spawn(async move {
        apply_mutation(&s2, scope, user, TaskMutation::Move { task_id, status: TaskStatus::Done }).await
    });
    m1.await.unwrap().unwrap();
    m2.await.unwrap().unwrap();

    let final_store = crate::store::TaskStore::list(store.as_ref(), scope).await.unwrap();
    let mut last_seen = Vec::new();
    for rx in [&mut rx_a, &mut rx_b] {
        let mut last = None;
        while let Ok(f) = rx.try_recv() {
            last = Some(tasks_of(&f));
        }
        last_seen.push(last.unwrap());
    }
    assert_eq!(last_seen[0], last_seen[1]);
    assert_eq!(last_seen[0], final_store);
}

#[tokio::test]
async fn broadcast_stays_within_scope() {
    let state = test_helpers::test_app_state();
    let scope = Scope::Org(Uuid::new_v4());
    let (_a, mut rx_a) = joined(&state, scope).await;
    let (_b, mut rx_b) = joined(&state, scope).await;
    let (_c, mut rx_other) = joined(&state, Scope::Org(Uuid::new_v4())).await;

    broadcast(&state, scope, &tasks_frame(scope.update_event(), &[])).await;
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_ok());
    assert!(rx_other.try_recv().is_err());
}

// =============================================================================
// parsing
// =============================================================================

#[test]
fn parse_add_defaults_and_trims() {
    let m = TaskMutation::from_frame(&frame(EVENT_ADD_TASK, json!({"title": "  write  ", "priority": ""}))).unwrap();
    assert_eq!(
        m,
        TaskMutation::Add {
            title: "write".into(),
            description: None,
            priority: None,
            status: TaskStatus::Todo,
            assigned_to: None
        }
    );
}

#[test]
fn parse_rejects_blank_title() {
    let err = TaskMutation::from_frame(&frame(EVENT_ADD_TASK, json!({"title": "   "}))).unwrap_err();
    assert!(matches!(err, RelayError::MissingField("title")));
}

#[test]
fn parse_move_validates_status_and_id() {
    let id = Uuid::new_v4();
    let m = TaskMutation::from_frame(&frame(EVENT_TASK_MOVED, json!({"taskId": id.to_string(), "newStatus": "done"})))
        .unwrap();
    assert_eq!(m, TaskMutation::Move { task_id: id, status: TaskStatus::Done });

    let err = TaskMutation::from_frame(&frame(EVENT_TASK_MOVED, json!({"taskId": id.to_string(), "newStatus": "later"})))
        .unwrap_err();
    assert_eq!(err.error_code(), "E_INVALID_STATUS");

    let err = TaskMutation::from_frame(&frame(EVENT_TASK_MOVED, json!({"taskId": 42, "newStatus": "done"}))).unwrap_err();
    assert!(matches!(err, RelayError::InvalidField { field: "taskId", .. }));
}

#[test]
fn parse_rename_and_delete_need_task_id() {
    let err = TaskMutation::from_frame(&frame(EVENT_RENAME_TASK, json!({"newTitle": "x"}))).unwrap_err();
    assert!(matches!(err, RelayError::MissingField("taskId")));
    let err = TaskMutation::from_frame(&frame(EVENT_DELETE_TASK, json!({}))).unwrap_err();
    assert!(matches!(err, RelayError::MissingField("taskId")));
}

#[test]
fn parse_unknown_event() {
    let err = TaskMutation::from_frame(&frame("archiveTask", json!({}))).unwrap_err();
    assert!(matches!(err, RelayError::UnknownEvent(ref e) if e == "archiveTask"));
}

#[test]
fn parse_rejoin_identity() {
    let user = Uuid::new_v4();
    let org = Uuid::new_v4();
    assert_eq!(parse_rejoin(&frame(EVENT_REJOIN, json!({"userId": user.to_string()}))).unwrap(), (user, None));
    assert_eq!(
        parse_rejoin(&frame(EVENT_REJOIN, json!({"userId": user.to_string(), "orgId": org.to_string()}))).unwrap(),
        (user, Some(org))
    );
    assert_eq!(
        parse_rejoin(&frame(EVENT_REJOIN, json!({"userId": user.to_string(), "orgId": null}))).unwrap(),
        (user, None)
    );
    assert!(parse_rejoin(&frame(EVENT_REJOIN, json!({"orgId": org.to_string()}))).is_err());
    assert!(parse_rejoin(&frame(EVENT_REJOIN, json!({"userId": "nope"}))).is_err());
}
