//! User repository for database operations

use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::info;

use crate::models::{ProvisionStatus, VpnUser, from_unix};

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

fn row_to_user(row: &SqliteRow) -> DatabaseResult<VpnUser> {
    let status: String = row.try_get("provision_status").map_err(DatabaseError::Query)?;
    let provision_status = status
        .parse()
        .map_err(|e: String| DatabaseError::Query(sqlx::Error::Decode(e.into())))?;

    Ok(VpnUser {
        username: row.try_get("username").map_err(DatabaseError::Query)?,
        display_name: row.try_get("display_name").map_err(DatabaseError::Query)?,
        created_at: from_unix(row.try_get("created_at").map_err(DatabaseError::Query)?),
        active: row.try_get("active").map_err(DatabaseError::Query)?,
        provision_status,
    })
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a user whose provisioning has not completed yet
    ///
    /// Fails with [`DatabaseError::Duplicate`] when the username is taken.
    pub async fn create_pending(&self, username: &str, now: DateTime<Utc>) -> DatabaseResult<VpnUser> {
        info!(username = %username, "Creating pending user");

        let row = sqlx::query(
            r#"
            INSERT INTO vpn_users (username, created_at, active, provision_status)
            VALUES (?, ?, 1, ?)
            RETURNING username, display_name, created_at, active, provision_status
            "#,
        )
        .bind(username)
        .bind(now.timestamp())
        .bind(ProvisionStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_query)?;

        row_to_user(&row)
    }

    /// Record the outcome of the provisioning step
    pub async fn set_provision_status(
        &self,
        username: &str,
        status: ProvisionStatus,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query("UPDATE vpn_users SET provision_status = ? WHERE username = ?")
            .bind(status.as_str())
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    /// Find a user by username
    pub async fn find(&self, username: &str) -> DatabaseResult<Option<VpnUser>> {
        let row = sqlx::query(
            r#"
            SELECT username, display_name, created_at, active, provision_status
            FROM vpn_users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// List all users, newest first
    pub async fn list(&self) -> DatabaseResult<Vec<VpnUser>> {
        let rows = sqlx::query(
            r#"
            SELECT username, display_name, created_at, active, provision_status
            FROM vpn_users
            ORDER BY created_at DESC, username ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        rows.iter().map(row_to_user).collect()
    }

    /// Delete a user; its certificate links go with it
    pub async fn delete(&self, username: &str) -> DatabaseResult<bool> {
        info!(username = %username, "Deleting user");

        let result = sqlx::query("DELETE FROM vpn_users WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip the active flag, returning the new value
    pub async fn toggle_active(&self, username: &str) -> DatabaseResult<Option<bool>> {
        let active = sqlx::query_scalar(
            "UPDATE vpn_users SET active = NOT active WHERE username = ? RETURNING active",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(active)
    }

    pub async fn update_display_name(
        &self,
        username: &str,
        display_name: Option<&str>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query("UPDATE vpn_users SET display_name = ? WHERE username = ?")
            .bind(display_name)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}
