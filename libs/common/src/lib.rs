//! Common library for the VPN admin panel
//!
//! This crate provides shared infrastructure used by the admin service:
//! SQLite connectivity and schema, the optional Redis client, and the
//! storage error taxonomy.

pub mod cache;
pub mod database;
pub mod error;

/// Example usage of the database module
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig {
///         database_url: "sqlite://vpn_users.db".to_string(),
///         max_connections: 5,
///     };
///     let pool = init_pool(&config).await?;
///     run_migrations(&pool).await?;
///     let is_healthy = health_check(&pool).await?;
///     assert!(is_healthy);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
