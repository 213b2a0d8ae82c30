//! Certificate link repository: the durable token store
//!
//! Records are append-only. Apart from the optional `redeemed_at` marker no
//! column of an existing link is ever updated; links disappear through
//! revocation, the expiry sweep, or cascade deletion of their owner.

use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::info;

use crate::models::{CertLink, Platform, from_unix};

/// Certificate link repository
#[derive(Clone)]
pub struct CertLinkRepository {
    pool: SqlitePool,
}

fn row_to_link(row: &SqliteRow) -> DatabaseResult<CertLink> {
    let platform: String = row.try_get("platform").map_err(DatabaseError::Query)?;
    let platform: Platform = platform
        .parse()
        .map_err(|e| DatabaseError::Query(sqlx::Error::Decode(Box::new(e))))?;
    let redeemed_at: Option<i64> = row.try_get("redeemed_at").map_err(DatabaseError::Query)?;

    Ok(CertLink {
        id: row.try_get("id").map_err(DatabaseError::Query)?,
        username: row.try_get("username").map_err(DatabaseError::Query)?,
        platform,
        password: row.try_get("password").map_err(DatabaseError::Query)?,
        expires_at: from_unix(row.try_get("expires_at").map_err(DatabaseError::Query)?),
        created_at: from_unix(row.try_get("created_at").map_err(DatabaseError::Query)?),
        redeemed_at: redeemed_at.map(from_unix),
    })
}

impl CertLinkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a freshly issued link
    pub async fn insert(&self, link: &CertLink) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cert_links (id, username, platform, password, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&link.id)
        .bind(&link.username)
        .bind(link.platform.as_str())
        .bind(&link.password)
        .bind(link.expires_at.timestamp())
        .bind(link.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_query)?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<CertLink>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, platform, password, expires_at, created_at, redeemed_at
            FROM cert_links
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.as_ref().map(row_to_link).transpose()
    }

    /// All links of a user, newest first
    pub async fn list_for_user(&self, username: &str) -> DatabaseResult<Vec<CertLink>> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, platform, password, expires_at, created_at, redeemed_at
            FROM cert_links
            WHERE username = ?
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        rows.iter().map(row_to_link).collect()
    }

    /// Stamp the first redemption of a link
    ///
    /// Returns `false` when the link was already redeemed or does not exist,
    /// so concurrent redemptions of a single-use link cannot both succeed.
    pub async fn mark_redeemed(&self, id: &str, at: DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE cert_links SET redeemed_at = ? WHERE id = ? AND redeemed_at IS NULL",
        )
        .bind(at.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() == 1)
    }

    /// Revoke a single link
    pub async fn delete(&self, id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM cert_links WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove every link whose expiry is at or before `now`
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM cert_links WHERE expires_at <= ?")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "Swept expired certificate links");
        }
        Ok(removed)
    }
}
