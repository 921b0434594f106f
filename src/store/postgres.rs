//! Direct SQL access to the platform's `tasks` table.
//!
//! For deployments that reach the platform database over its Postgres
//! connection string instead of the REST API. The schema belongs to the
//! platform, so no migrations run from here.

use sqlx::PgPool;
use uuid::Uuid;

use super::{NewTask, Scope, Task, TaskError, TaskPatch, TaskStore};

type TaskRow = (Uuid, String, Option<String>, String, Option<String>, Option<Uuid>, Uuid, Option<Uuid>);

const TASK_COLUMNS: &str = "id, title, description, status, priority, assigned_to, user_id, org_id";

/// Scope predicate appended to every query; `$1` binds the scope id.
fn scope_clause(scope: Scope) -> &'static str {
    match scope {
        Scope::Personal(_) => "user_id = $1 AND org_id IS NULL",
        Scope::Org(_) => "org_id = $1",
    }
}

fn scope_id(scope: Scope) -> Uuid {
    match scope {
        Scope::Personal(id) | Scope::Org(id) => id,
    }
}

fn row_to_task(row: TaskRow) -> Result<Task, TaskError> {
    let (id, title, description, status, priority, assigned_to, user_id, org_id) = row;
    Ok(Task { id, title, description, status: status.parse()?, priority, assigned_to, user_id, org_id })
}

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskStore for PgTaskStore {
    async fn list(&self, scope: Scope) -> Result<Vec<Task>, TaskError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE {} ORDER BY created_at ASC", scope_clause(scope));
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(scope_id(scope))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_task).collect()
    }

    async fn insert(&self, task: NewTask) -> Result<Task, TaskError> {
        let sql = format!(
            "INSERT INTO tasks (id, title, description, status, priority, assigned_to, user_id, org_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status.as_str())
            .bind(&task.priority)
            .bind(task.assigned_to)
            .bind(task.user_id)
            .bind(task.org_id)
            .fetch_one(&self.pool)
            .await?;
        row_to_task(row)
    }

    async fn update(&self, scope: Scope, task_id: Uuid, patch: TaskPatch) -> Result<Task, TaskError> {
        let sql = format!(
            "UPDATE tasks SET status = COALESCE($3, status), title = COALESCE($4, title) \
             WHERE id = $2 AND {} RETURNING {TASK_COLUMNS}",
            scope_clause(scope)
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(scope_id(scope))
            .bind(task_id)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.title)
            .fetch_optional(&self.pool)
            .await?;
        row.map_or(Err(TaskError::NotFound(task_id)), row_to_task)
    }

    async fn delete(&self, scope: Scope, task_id: Uuid) -> Result<(), TaskError> {
        let sql = format!("DELETE FROM tasks WHERE id = $2 AND {}", scope_clause(scope));
        let result = sqlx::query(&sql)
            .bind(scope_id(scope))
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TaskError::NotFound(task_id));
        }
        Ok(())
    }
}
