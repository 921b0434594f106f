mod config;
mod db;
mod frame;
mod llm;
mod rate_limit;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError, TaskStoreConfig};
use crate::llm::LlmChat;
use crate::rate_limit::RateLimiter;
use crate::services::session::SessionStore;
use crate::store::{TaskError, TaskStore};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("task store: {0}")]
    Store(#[from] TaskError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // A missing .env file is fine; real deployments set the environment.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env()?;
    let tasks = build_task_store(&config.task_store).await?;

    // Non-fatal: chat answers 500 until the LLM is configured.
    let llm: Option<Arc<dyn LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!(error = %e, "LLM client not configured, AI chat disabled");
            None
        }
    };

    let sessions = SessionStore::new(config.sessions, config.chat.system_prompt.clone());
    if let Some(ttl) = config.sessions.idle_ttl {
        let _sweeper = services::sweeper::spawn_session_sweeper(sessions.clone(), services::sweeper::sweep_interval(ttl));
    }

    let state = state::AppState::new(tasks, llm, sessions, config.chat, RateLimiter::new(config.rate_limit));
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(port = config.port, "taskdeck listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_task_store(config: &TaskStoreConfig) -> Result<Arc<dyn TaskStore>, StartupError> {
    match config {
        TaskStoreConfig::Rest { platform_url, service_key, table } => {
            info!(%platform_url, %table, "task store: platform REST");
            Ok(Arc::new(store::rest::RestTaskStore::new(platform_url, service_key.clone(), table)?))
        }
        TaskStoreConfig::Postgres { database_url, max_connections } => {
            info!(max_connections, "task store: postgres");
            let pool = db::init_pool(database_url, *max_connections).await?;
            Ok(Arc::new(store::postgres::PgTaskStore::new(pool)))
        }
        TaskStoreConfig::Memory => {
            warn!("task store: in-memory, tasks are lost on restart");
            Ok(Arc::new(store::memory::InMemoryTaskStore::new()))
        }
    }
}
