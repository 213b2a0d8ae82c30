//! Database module for handling SQLite connections and schema setup
//!
//! This module provides connection pooling, configuration, schema migration
//! and health checks for the SQLite database that backs the admin panel.

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Database configuration struct
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Schema statements, applied in order. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS vpn_users (
        username TEXT PRIMARY KEY,
        display_name TEXT,
        created_at INTEGER NOT NULL,
        active BOOLEAN NOT NULL DEFAULT 1,
        provision_status TEXT NOT NULL DEFAULT 'pending'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cert_links (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        platform TEXT NOT NULL,
        password TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        redeemed_at INTEGER,
        FOREIGN KEY (username) REFERENCES vpn_users(username) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cert_links_username ON cert_links(username)",
    "CREATE INDEX IF NOT EXISTS idx_cert_links_expires_at ON cert_links(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS login_attempts (
        key TEXT PRIMARY KEY,
        failures INTEGER NOT NULL,
        window_started INTEGER NOT NULL,
        banned_until INTEGER
    )
    "#,
];

/// Initialize a SQLite connection pool
///
/// Foreign keys are switched on for every connection so that deleting a
/// user cascades to its certificate links.
pub async fn init_pool(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| DatabaseError::Configuration(format!("Invalid database URL: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)?;

    info!(url = %config.database_url, "Database pool initialized");
    Ok(pool)
}

/// Initialize an in-memory SQLite pool
///
/// Each in-memory connection is its own database, so the pool is pinned to
/// a single connection.
pub async fn init_memory_pool() -> DatabaseResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| DatabaseError::Configuration(e.to_string()))?
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)
}

/// Create the tables used by the admin panel if they do not exist yet
pub async fn run_migrations(pool: &SqlitePool) -> DatabaseResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    }

    info!("Database schema is up to date");
    Ok(())
}

/// Check database connectivity
pub async fn health_check(pool: &SqlitePool) -> DatabaseResult<bool> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(DatabaseError::Query)?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() -> DatabaseResult<()> {
        let pool = init_memory_pool().await?;
        run_migrations(&pool).await?;
        run_migrations(&pool).await?;
        assert!(health_check(&pool).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_user_deletion_cascades_to_links() -> DatabaseResult<()> {
        let pool = init_memory_pool().await?;
        run_migrations(&pool).await?;

        sqlx::query("INSERT INTO vpn_users (username, created_at) VALUES ('alice', 0)")
            .execute(&pool)
            .await
            .map_err(DatabaseError::Query)?;
        sqlx::query(
            "INSERT INTO cert_links (id, username, platform, password, expires_at, created_at)
             VALUES ('l1', 'alice', 'ios', 'secret12', 10, 0)",
        )
        .execute(&pool)
        .await
        .map_err(DatabaseError::Query)?;

        sqlx::query("DELETE FROM vpn_users WHERE username = 'alice'")
            .execute(&pool)
            .await
            .map_err(DatabaseError::Query)?;

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cert_links")
            .fetch_one(&pool)
            .await
            .map_err(DatabaseError::Query)?;
        assert_eq!(remaining, 0);
        Ok(())
    }
}
