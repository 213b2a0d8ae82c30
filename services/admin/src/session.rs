//! Session state: bearer link authorizations and admin logins
//!
//! Both live in a [`SessionStore`], a set of expiring keys kept either in
//! process memory or in Redis. Bearer authorizations are keyed by the exact
//! `(session, link)` pair, so verifying one link's password never grants
//! access to any other link.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::cache::RedisPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;

/// Opaque identifier of a browsing session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh, unguessable session id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accept a client-supplied id only if it has the shape we mint
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::try_parse(raw)
            .ok()
            .map(|id| Self(id.simple().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<Mutex<HashMap<String, DateTime<Utc>>>>),
    Redis(RedisPool),
}

/// Store of expiring session flags
#[derive(Clone)]
pub struct SessionStore {
    backend: Backend,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    /// In-process store; state is lost on restart
    pub fn in_memory(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
            clock,
            ttl,
        }
    }

    /// Redis-backed store; Redis enforces the TTL
    pub fn redis(pool: RedisPool, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            backend: Backend::Redis(pool),
            clock,
            ttl,
        }
    }

    async fn set(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Memory(entries) => {
                let expires = self.clock.now() + self.ttl;
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.insert(key.to_string(), expires);
                Ok(())
            }
            Backend::Redis(pool) => {
                let ttl = u64::try_from(self.ttl.num_seconds()).unwrap_or(1).max(1);
                pool.set(key, "1", Some(ttl)).await
            }
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Backend::Memory(entries) => {
                let now = self.clock.now();
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                match entries.get(key) {
                    Some(expires) if now < *expires => Ok(true),
                    Some(_) => {
                        entries.remove(key);
                        Ok(false)
                    }
                    None => Ok(false),
                }
            }
            Backend::Redis(pool) => pool.exists(key).await,
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Memory(entries) => {
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.remove(key);
                Ok(())
            }
            Backend::Redis(pool) => pool.delete(key).await,
        }
    }

    /// Drop expired in-memory entries; Redis expires keys on its own
    pub fn purge_expired(&self) -> usize {
        match &self.backend {
            Backend::Memory(entries) => {
                let now = self.clock.now();
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                let before = entries.len();
                entries.retain(|_, expires| now < *expires);
                before - entries.len()
            }
            Backend::Redis(_) => 0,
        }
    }

    pub async fn health_check(&self) -> Result<bool> {
        match &self.backend {
            Backend::Memory(_) => Ok(true),
            Backend::Redis(pool) => pool.health_check().await,
        }
    }
}

/// Per-bearer, per-link "password verified" flags
#[derive(Clone)]
pub struct SessionAuthorizationCache {
    store: SessionStore,
}

impl SessionAuthorizationCache {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    fn key(session: &SessionId, link_id: &str) -> String {
        format!("cert_access:{}:{}", session.as_str(), link_id)
    }

    /// Record that `session` proved the password of `link_id`
    pub async fn grant(&self, session: &SessionId, link_id: &str) -> Result<()> {
        debug!(link_id = %link_id, "Granting link access to session");
        self.store.set(&Self::key(session, link_id)).await
    }

    pub async fn is_granted(&self, session: &SessionId, link_id: &str) -> Result<bool> {
        self.store.contains(&Self::key(session, link_id)).await
    }
}

/// Logged-in administrator sessions
#[derive(Clone)]
pub struct AdminSessions {
    store: SessionStore,
}

impl AdminSessions {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    fn key(session: &SessionId) -> String {
        format!("admin_session:{}", session.as_str())
    }

    /// Open a new admin session
    pub async fn create(&self) -> Result<SessionId> {
        let session = SessionId::generate();
        self.store.set(&Self::key(&session)).await?;
        info!("Admin session created");
        Ok(session)
    }

    pub async fn is_valid(&self, session: &SessionId) -> Result<bool> {
        self.store.contains(&Self::key(session)).await
    }

    pub async fn destroy(&self, session: &SessionId) -> Result<()> {
        info!("Admin session destroyed");
        self.store.remove(&Self::key(session)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store(clock: Arc<ManualClock>) -> SessionStore {
        SessionStore::in_memory(clock, Duration::hours(1))
    }

    #[test]
    fn test_session_id_parse_rejects_garbage() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert_eq!(SessionId::parse("../../etc"), None);
        assert_eq!(SessionId::parse(""), None);
    }

    #[tokio::test]
    async fn test_grant_is_scoped_to_session_and_link() -> Result<()> {
        let clock = Arc::new(ManualClock::fixed());
        let cache = SessionAuthorizationCache::new(store(clock));
        let session = SessionId::generate();
        let other_session = SessionId::generate();

        cache.grant(&session, "link-a").await?;

        assert!(cache.is_granted(&session, "link-a").await?);
        assert!(!cache.is_granted(&session, "link-b").await?);
        assert!(!cache.is_granted(&other_session, "link-a").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_expires_with_session() -> Result<()> {
        let clock = Arc::new(ManualClock::fixed());
        let cache = SessionAuthorizationCache::new(store(clock.clone()));
        let session = SessionId::generate();

        cache.grant(&session, "link-a").await?;
        clock.advance(Duration::minutes(59));
        assert!(cache.is_granted(&session, "link-a").await?);

        clock.advance(Duration::minutes(1));
        assert!(!cache.is_granted(&session, "link-a").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_sessions_do_not_leak_into_link_grants() -> Result<()> {
        let clock = Arc::new(ManualClock::fixed());
        let shared = store(clock);
        let admins = AdminSessions::new(shared.clone());
        let cache = SessionAuthorizationCache::new(shared);

        let admin = admins.create().await?;
        assert!(admins.is_valid(&admin).await?);
        assert!(!cache.is_granted(&admin, "link-a").await?);

        admins.destroy(&admin).await?;
        assert!(!admins.is_valid(&admin).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_expired() -> Result<()> {
        let clock = Arc::new(ManualClock::fixed());
        let shared = store(clock.clone());
        let cache = SessionAuthorizationCache::new(shared.clone());

        cache.grant(&SessionId::generate(), "a").await?;
        cache.grant(&SessionId::generate(), "b").await?;
        clock.advance(Duration::hours(2));

        assert_eq!(shared.purge_expired(), 2);
        Ok(())
    }
}
