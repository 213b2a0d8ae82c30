//! Rate limiter for preventing brute force attacks
//!
//! Attempts are reserved per key inside a window before they are evaluated
//! and only released by a success; reaching the limit bans the key for a
//! fixed period. Attempt state lives in an
//! [`AttemptStore`], so the SQLite backend survives restarts.

use chrono::{DateTime, Duration, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::models::from_unix;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Failures allowed inside one window before the key is banned
    pub max_attempts: u32,
    /// Time window in seconds
    pub window_seconds: i64,
    /// Ban duration in seconds
    pub ban_seconds: i64,
}

impl RateLimiterConfig {
    /// Admin login: 3 failures in 5 minutes, 30 minute ban
    pub fn login() -> Self {
        Self {
            max_attempts: 3,
            window_seconds: 300,
            ban_seconds: 1800,
        }
    }

    /// Link passwords: 5 failures in 5 minutes, 15 minute ban
    pub fn link_password() -> Self {
        Self {
            max_attempts: 5,
            window_seconds: 300,
            ban_seconds: 900,
        }
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// Banned; `retry_after` is in whole seconds, rounded up
    Blocked { retry_after: u64 },
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    failures: u32,
    window_started: DateTime<Utc>,
    banned_until: Option<DateTime<Utc>>,
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<std::sync::Mutex<HashMap<String, AttemptRecord>>>),
    Sqlite(SqlitePool),
}

/// Where attempt counters are kept
#[derive(Clone)]
pub struct AttemptStore {
    backend: Backend,
}

impl AttemptStore {
    /// In-process counters, lost on restart
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(std::sync::Mutex::new(HashMap::new()))),
        }
    }

    /// Counters in the `login_attempts` table
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            backend: Backend::Sqlite(pool),
        }
    }

    async fn load(&self, key: &str) -> DatabaseResult<Option<AttemptRecord>> {
        match &self.backend {
            Backend::Memory(entries) => {
                let entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                Ok(entries.get(key).cloned())
            }
            Backend::Sqlite(pool) => {
                let row: Option<(i64, i64, Option<i64>)> = sqlx::query_as(
                    "SELECT failures, window_started, banned_until FROM login_attempts WHERE key = ?",
                )
                .bind(key)
                .fetch_optional(pool)
                .await
                .map_err(DatabaseError::Query)?;

                Ok(row.map(|(failures, window_started, banned_until)| AttemptRecord {
                    failures: u32::try_from(failures).unwrap_or(u32::MAX),
                    window_started: from_unix(window_started),
                    banned_until: banned_until.map(from_unix),
                }))
            }
        }
    }

    async fn save(&self, key: &str, record: &AttemptRecord) -> DatabaseResult<()> {
        match &self.backend {
            Backend::Memory(entries) => {
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.insert(key.to_string(), record.clone());
                Ok(())
            }
            Backend::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO login_attempts (key, failures, window_started, banned_until)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        failures = excluded.failures,
                        window_started = excluded.window_started,
                        banned_until = excluded.banned_until
                    "#,
                )
                .bind(key)
                .bind(i64::from(record.failures))
                .bind(record.window_started.timestamp())
                .bind(record.banned_until.map(|t| t.timestamp()))
                .execute(pool)
                .await
                .map_err(DatabaseError::Query)?;
                Ok(())
            }
        }
    }

    async fn remove(&self, key: &str) -> DatabaseResult<()> {
        match &self.backend {
            Backend::Memory(entries) => {
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.remove(key);
                Ok(())
            }
            Backend::Sqlite(pool) => {
                sqlx::query("DELETE FROM login_attempts WHERE key = ?")
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(DatabaseError::Query)?;
                Ok(())
            }
        }
    }
}

/// Rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    store: AttemptStore,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write of attempt records
    guard: Arc<Mutex<()>>,
}

fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0).max(1)
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, store: AttemptStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Whether `key` may attempt right now
    pub async fn check(&self, key: &str) -> DatabaseResult<RateLimitDecision> {
        let now = self.clock.now();
        let record = self.store.load(key).await?;

        if let Some(AttemptRecord {
            banned_until: Some(until),
            ..
        }) = record
        {
            if now < until {
                return Ok(RateLimitDecision::Blocked {
                    retry_after: seconds_until(now, until),
                });
            }
        }

        Ok(RateLimitDecision::Allowed)
    }

    /// Reserve an attempt for `key` before doing any work.
    ///
    /// The attempt is counted as a failure up front and stays counted unless
    /// [`reset`](Self::reset) is called after a success. Reserving the last
    /// allowed attempt bans the key, so concurrent callers can never run more
    /// than `max_attempts` attempts per window.
    pub async fn try_acquire(&self, key: &str) -> DatabaseResult<RateLimitDecision> {
        let _guard = self.guard.lock().await;
        let now = self.clock.now();

        let fresh = AttemptRecord {
            failures: 0,
            window_started: now,
            banned_until: None,
        };
        let mut record = match self.store.load(key).await? {
            // Ban over: start from scratch
            Some(AttemptRecord {
                banned_until: Some(until),
                ..
            }) if now >= until => fresh,
            Some(record)
                if record.banned_until.is_none()
                    && now - record.window_started
                        >= Duration::seconds(self.config.window_seconds) =>
            {
                fresh
            }
            Some(record) => record,
            None => fresh,
        };

        if let Some(until) = record.banned_until {
            return Ok(RateLimitDecision::Blocked {
                retry_after: seconds_until(now, until),
            });
        }

        record.failures = record.failures.saturating_add(1);
        if record.failures >= self.config.max_attempts {
            record.banned_until = Some(now + Duration::seconds(self.config.ban_seconds));
            warn!(
                key = %key,
                ban_seconds = self.config.ban_seconds,
                "Attempt limit reached, key banned"
            );
        }

        self.store.save(key, &record).await?;
        Ok(RateLimitDecision::Allowed)
    }

    /// Forget all failures of `key`
    pub async fn reset(&self, key: &str) -> DatabaseResult<()> {
        let _guard = self.guard.lock().await;
        self.store.remove(key).await?;
        info!(key = %key, "Rate limit counters reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repositories::test_pool;

    fn limiter(store: AttemptStore) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::fixed());
        let limiter = RateLimiter::new(RateLimiterConfig::login(), store, clock.clone());
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_bans_after_max_attempts() -> DatabaseResult<()> {
        let (clock, limiter) = limiter(AttemptStore::memory());

        assert_eq!(limiter.try_acquire("login:admin").await?, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("login:admin").await?, RateLimitDecision::Allowed);
        assert_eq!(limiter.try_acquire("login:admin").await?, RateLimitDecision::Allowed);
        // The last allowed attempt still runs, but bans the key
        assert_eq!(limiter.try_acquire("login:admin").await?, RateLimitDecision::Allowed);
        assert_eq!(
            limiter.check("login:admin").await?,
            RateLimitDecision::Blocked { retry_after: 1800 }
        );
        assert_eq!(
            limiter.try_acquire("login:admin").await?,
            RateLimitDecision::Blocked { retry_after: 1800 }
        );

        clock.advance(Duration::minutes(10));
        assert_eq!(
            limiter.check("login:admin").await?,
            RateLimitDecision::Blocked { retry_after: 1200 }
        );
        // Other keys are unaffected
        assert_eq!(limiter.check("login:other").await?, RateLimitDecision::Allowed);

        clock.advance(Duration::minutes(20));
        assert_eq!(limiter.check("login:admin").await?, RateLimitDecision::Allowed);
        assert_eq!(limiter.try_acquire("login:admin").await?, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("login:admin").await?, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test]
    async fn test_window_expiry_forgets_attempts() -> DatabaseResult<()> {
        let (clock, limiter) = limiter(AttemptStore::memory());

        limiter.try_acquire("k").await?;
        limiter.try_acquire("k").await?;
        clock.advance(Duration::minutes(6));
        limiter.try_acquire("k").await?;
        limiter.try_acquire("k").await?;
        assert_eq!(limiter.check("k").await?, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_releases_attempts() -> DatabaseResult<()> {
        let (_clock, limiter) = limiter(AttemptStore::memory());

        limiter.try_acquire("k").await?;
        limiter.try_acquire("k").await?;
        limiter.reset("k").await?;
        limiter.try_acquire("k").await?;
        limiter.try_acquire("k").await?;
        assert_eq!(limiter.check("k").await?, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_lifts_ban() -> DatabaseResult<()> {
        let (_clock, limiter) = limiter(AttemptStore::memory());

        for _ in 0..3 {
            limiter.try_acquire("k").await?;
        }
        assert!(matches!(limiter.check("k").await?, RateLimitDecision::Blocked { .. }));

        limiter.reset("k").await?;
        assert_eq!(limiter.check("k").await?, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_new_limiter() -> DatabaseResult<()> {
        let pool = test_pool().await;
        let clock = Arc::new(ManualClock::fixed());
        let first = RateLimiter::new(
            RateLimiterConfig::link_password(),
            AttemptStore::sqlite(pool.clone()),
            clock.clone(),
        );
        for _ in 0..5 {
            first.try_acquire("link:abc").await?;
        }

        // A limiter built after a restart sees the same ban
        let second = RateLimiter::new(
            RateLimiterConfig::link_password(),
            AttemptStore::sqlite(pool),
            clock.clone(),
        );
        assert_eq!(
            second.check("link:abc").await?,
            RateLimitDecision::Blocked { retry_after: 900 }
        );

        second.reset("link:abc").await?;
        assert_eq!(second.check("link:abc").await?, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquires_never_exceed_limit() -> DatabaseResult<()> {
        let (_clock, limiter) = limiter(AttemptStore::sqlite(test_pool().await));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_acquire("k").await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.expect("task")? == RateLimitDecision::Allowed {
                granted += 1;
            }
        }

        assert_eq!(granted, RateLimiterConfig::login().max_attempts);
        assert!(matches!(
            limiter.check("k").await?,
            RateLimitDecision::Blocked { .. }
        ));
        Ok(())
    }
}
