//! Database pool initialization.
//!
//! SYSTEM CONTEXT
//! ==============
//! Only used when `TASK_STORE=postgres`. The task schema is owned by the
//! platform, so startup connects and verifies reachability but never
//! migrates.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Initialize the `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns an error if the initial connection fails.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await
}
