//! Integration tests for the infrastructure components
//!
//! These tests verify that the SQLite schema is created correctly and that
//! its constraints hold from outside the crate.

use common::{
    database::{health_check, init_memory_pool, run_migrations},
    error::DatabaseError,
};
use sqlx::Row;

/// Test that the schema is usable end to end
#[tokio::test]
async fn test_infrastructure_integration() -> Result<(), Box<dyn std::error::Error>> {
    let pool = init_memory_pool().await?;
    run_migrations(&pool).await?;

    assert!(health_check(&pool).await?, "Database health check failed");

    let row = sqlx::query("SELECT 1 as result").fetch_one(&pool).await?;
    let result: i32 = row.get("result");
    assert_eq!(result, 1, "SQLite simple query test failed");

    sqlx::query("INSERT INTO vpn_users (username, created_at) VALUES ('bob', 0)")
        .execute(&pool)
        .await?;

    let duplicate = sqlx::query("INSERT INTO vpn_users (username, created_at) VALUES ('bob', 1)")
        .execute(&pool)
        .await
        .map_err(DatabaseError::from_query);
    assert!(
        matches!(duplicate, Err(DatabaseError::Duplicate(_))),
        "Primary key violation was not classified as a duplicate"
    );

    Ok(())
}

/// Links cannot reference users that do not exist
#[tokio::test]
async fn test_cert_links_require_an_existing_user() -> Result<(), Box<dyn std::error::Error>> {
    let pool = init_memory_pool().await?;
    run_migrations(&pool).await?;

    let orphan = sqlx::query(
        "INSERT INTO cert_links (id, username, platform, password, expires_at, created_at)
         VALUES ('l1', 'ghost', 'pc', 'secret12', 10, 0)",
    )
    .execute(&pool)
    .await;
    assert!(orphan.is_err(), "Foreign key constraint was not enforced");

    Ok(())
}
