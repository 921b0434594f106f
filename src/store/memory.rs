//! In-memory task store for local development and tests.

use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::{NewTask, Scope, Task, TaskError, TaskPatch, TaskStore};

/// Insertion-ordered task list behind an async lock.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `tasks`, kept in the given order.
    #[cfg(test)]
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks: Arc::new(RwLock::new(tasks)) }
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list(&self, scope: Scope) -> Result<Vec<Task>, TaskError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .iter()
            .filter(|task| scope.contains(task))
            .cloned()
            .collect())
    }

    async fn insert(&self, new: NewTask) -> Result<Task, TaskError> {
        let task = Task {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            assigned_to: new.assigned_to,
            user_id: new.user_id,
            org_id: new.org_id,
        };
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn update(&self, scope: Scope, task_id: Uuid, patch: TaskPatch) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks
            .iter_mut()
            .find(|task| task.id == task_id && scope.contains(task))
        else {
            return Err(TaskError::NotFound(task_id));
        };
        patch.apply(task);
        Ok(task.clone())
    }

    async fn delete(&self, scope: Scope, task_id: Uuid) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|task| !(task.id == task_id && scope.contains(task)));
        if tasks.len() == before {
            return Err(TaskError::NotFound(task_id));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
