//! Process configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Everything goes through a key lookup so tests can feed a map instead of
//! mutating the process environment. Platform and numeric settings fail
//! fast at startup; LLM settings are parsed separately by `llm::config`
//! because a missing key only disables chat.

use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::services::chat::ChatSettings;
use crate::services::session::SessionConfig;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TASKS_TABLE: &str = "tasks";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant inside a team task board. \
Help users plan, break down and prioritise their work. Keep answers short and practical.";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: String },

    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: String, value: String },

    #[error("unknown TASK_STORE '{0}' (expected 'rest', 'postgres' or 'memory')")]
    UnknownTaskStore(String),
}

impl crate::frame::ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "E_CONFIG_MISSING",
            Self::Invalid { .. } => "E_CONFIG_INVALID",
            Self::UnknownTaskStore(_) => "E_UNKNOWN_TASK_STORE",
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Which [`crate::store::TaskStore`] backend to build at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStoreConfig {
    Rest { platform_url: String, service_key: String, table: String },
    Postgres { database_url: String, max_connections: u32 },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub task_store: TaskStoreConfig,
    pub chat: ChatSettings,
    pub sessions: SessionConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// # Errors
    ///
    /// See [`AppConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from a key lookup. Blank values count as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a number does not
    /// parse, or `TASK_STORE` names an unknown backend.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;
        let task_store = parse_task_store(&get)?;

        let chat = ChatSettings {
            temperature: parse_or(&get, "CHAT_TEMPERATURE", ChatSettings::DEFAULT_TEMPERATURE)?,
            max_tokens: parse_or(&get, "CHAT_MAX_TOKENS", ChatSettings::DEFAULT_MAX_TOKENS)?,
            system_prompt: get("CHAT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        let ttl_secs: u64 = parse_or(&get, "CHAT_SESSION_TTL_SECS", 0)?;
        let sessions = SessionConfig {
            max_turns: parse_or(&get, "CHAT_HISTORY_MAX_TURNS", SessionConfig::DEFAULT_MAX_TURNS)?,
            prune_turns: parse_or(&get, "CHAT_HISTORY_PRUNE_TURNS", SessionConfig::DEFAULT_PRUNE_TURNS)?,
            max_sessions: parse_or(&get, "CHAT_MAX_SESSIONS", SessionConfig::DEFAULT_MAX_SESSIONS)?,
            idle_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            per_session_limit: parse_or(&get, "RATE_LIMIT_PER_SESSION", defaults.per_session_limit)?,
            per_session_window: Duration::from_secs(parse_or(
                &get,
                "RATE_LIMIT_PER_SESSION_WINDOW_SECS",
                defaults.per_session_window.as_secs(),
            )?),
            global_limit: parse_or(&get, "RATE_LIMIT_GLOBAL", defaults.global_limit)?,
            global_window: Duration::from_secs(parse_or(
                &get,
                "RATE_LIMIT_GLOBAL_WINDOW_SECS",
                defaults.global_window.as_secs(),
            )?),
        };

        Ok(Self { port, task_store, chat, sessions, rate_limit })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_task_store(get: &impl Fn(&str) -> Option<String>) -> Result<TaskStoreConfig, ConfigError> {
    let kind = get("TASK_STORE").unwrap_or_else(|| "rest".to_string());
    match kind.as_str() {
        "rest" => Ok(TaskStoreConfig::Rest {
            platform_url: require(get, "PLATFORM_URL")?
                .trim_end_matches('/')
                .to_string(),
            service_key: require(get, "PLATFORM_SERVICE_KEY")?,
            table: get("PLATFORM_TASKS_TABLE").unwrap_or_else(|| DEFAULT_TASKS_TABLE.to_string()),
        }),
        "postgres" => Ok(TaskStoreConfig::Postgres {
            database_url: require(get, "DATABASE_URL")?,
            max_connections: parse_or(get, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
        }),
        "memory" => Ok(TaskStoreConfig::Memory),
        other => Err(ConfigError::UnknownTaskStore(other.to_string())),
    }
}

fn require(get: &impl Fn(&str) -> Option<String>, var: &str) -> Result<String, ConfigError> {
    get(var).ok_or_else(|| ConfigError::Missing { var: var.to_string() })
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var: var.to_string(), value: raw }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
