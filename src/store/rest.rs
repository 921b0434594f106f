//! Platform REST client for the `tasks` table.
//!
//! Thin reqwest wrapper over the platform's PostgREST endpoint
//! (`{base}/rest/v1/{table}`). Scope filters and response parsing are pure
//! functions so they can be tested without a live platform.

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use uuid::Uuid;

use super::{NewTask, Scope, Task, TaskError, TaskPatch, TaskStore};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// CLIENT
// =============================================================================

pub struct RestTaskStore {
    http: reqwest::Client,
    table_url: String,
    api_key: String,
}

impl RestTaskStore {
    /// Build a client for `{base_url}/rest/v1/{table}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, api_key: String, table: &str) -> Result<Self, TaskError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| TaskError::HttpClientBuild(e.to_string()))?;
        let table_url = format!("{}/rest/v1/{table}", base_url.trim_end_matches('/'));
        Ok(Self { http, table_url, api_key })
    }

    fn request(&self, method: Method, query: &[(String, String)]) -> RequestBuilder {
        self.http
            .request(method, &self.table_url)
            .query(query)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<String, TaskError> {
        let response = builder
            .send()
            .await
            .map_err(|e| TaskError::Request(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TaskError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(TaskError::Platform { status: status.as_u16(), body: text });
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl TaskStore for RestTaskStore {
    async fn list(&self, scope: Scope) -> Result<Vec<Task>, TaskError> {
        let mut query = vec![("select".to_owned(), "*".to_owned())];
        query.extend(scope_filters(scope));
        query.push(("order".to_owned(), "created_at.asc".to_owned()));
        let text = self.send(self.request(Method::GET, &query)).await?;
        parse_rows(&text)
    }

    async fn insert(&self, task: NewTask) -> Result<Task, TaskError> {
        let builder = self
            .request(Method::POST, &[])
            .header("Prefer", "return=representation")
            .json(&task);
        let text = self.send(builder).await?;
        parse_rows(&text)?
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::Parse("insert returned no rows".to_owned()))
    }

    async fn update(&self, scope: Scope, task_id: Uuid, patch: TaskPatch) -> Result<Task, TaskError> {
        let builder = self
            .request(Method::PATCH, &row_filters(scope, task_id))
            .header("Prefer", "return=representation")
            .json(&patch);
        let text = self.send(builder).await?;
        parse_rows(&text)?
            .into_iter()
            .next()
            .ok_or(TaskError::NotFound(task_id))
    }

    async fn delete(&self, scope: Scope, task_id: Uuid) -> Result<(), TaskError> {
        let builder = self
            .request(Method::DELETE, &row_filters(scope, task_id))
            .header("Prefer", "return=representation");
        let text = self.send(builder).await?;
        if parse_rows(&text)?.is_empty() {
            return Err(TaskError::NotFound(task_id));
        }
        Ok(())
    }
}

// =============================================================================
// FILTERS & PARSING
// =============================================================================

/// PostgREST filters selecting the rows of a scope.
fn scope_filters(scope: Scope) -> Vec<(String, String)> {
    match scope {
        Scope::Personal(user_id) => vec![
            ("user_id".to_owned(), format!("eq.{user_id}")),
            ("org_id".to_owned(), "is.null".to_owned()),
        ],
        Scope::Org(org_id) => vec![("org_id".to_owned(), format!("eq.{org_id}"))],
    }
}

/// Filters selecting one task, constrained to a scope.
fn row_filters(scope: Scope, task_id: Uuid) -> Vec<(String, String)> {
    let mut filters = vec![("id".to_owned(), format!("eq.{task_id}"))];
    filters.extend(scope_filters(scope));
    filters
}

/// Parse a PostgREST row array. An empty body counts as no rows.
fn parse_rows(text: &str) -> Result<Vec<Task>, TaskError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text).map_err(|e| TaskError::Parse(e.to_string()))
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
