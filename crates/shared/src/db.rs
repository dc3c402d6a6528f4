//! Database utilities and connection management

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::{str::FromStr, time::Duration};

/// Create a database connection pool
/// Note: Disables statement cache for PgBouncer compatibility
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    // PgBouncer in transaction mode doesn't support prepared statements
    let options = PgConnectOptions::from_str(database_url)?.statement_cache_capacity(0);

    // Workflows process items sequentially; three concurrent workflows plus
    // maintenance jobs fit comfortably in a handful of connections
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(300))
        .connect_with(options)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_create_pool() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url, 3).await.expect("Failed to create pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        assert!(pool.size() > 0);
    }
}
