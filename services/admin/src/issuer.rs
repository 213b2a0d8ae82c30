//! Link issuer: mints certificate links for a user and platform

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use common::error::DatabaseResult;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::models::{CertLink, Platform};
use crate::repositories::CertLinkRepository;

/// Random bytes behind each link id (128 bits)
pub const LINK_ID_BYTES: usize = 16;
/// Length of the shared link password
pub const PASSWORD_LEN: usize = 8;

/// Result of issuing a link. The password is only ever returned here.
#[derive(Debug, Clone)]
pub struct IssuedLink {
    pub link_id: String,
    pub password: String,
    pub expires_at: DateTime<Utc>,
}

/// URL-safe identifier drawn from the OS CSPRNG
pub fn generate_link_id() -> String {
    let mut bytes = [0u8; LINK_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Uniform draw from `[A-Za-z0-9]`
pub fn generate_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Link issuer
#[derive(Clone)]
pub struct LinkIssuer {
    links: CertLinkRepository,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LinkIssuer {
    pub fn new(links: CertLinkRepository, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { links, clock, ttl }
    }

    /// Create and persist a new link
    ///
    /// The caller has already checked that `username` exists. Issuing is not
    /// idempotent: every call yields an independent link.
    pub async fn issue(&self, username: &str, platform: Platform) -> DatabaseResult<IssuedLink> {
        let now = self.clock.now();
        let link = CertLink {
            id: generate_link_id(),
            username: username.to_string(),
            platform,
            password: generate_password(),
            expires_at: now + self.ttl,
            created_at: now,
            redeemed_at: None,
        };

        self.links.insert(&link).await?;
        info!(
            username = %username,
            platform = %platform,
            link_id = %link.id,
            expires_at = %link.expires_at,
            "Issued certificate link"
        );

        Ok(IssuedLink {
            link_id: link.id,
            password: link.password,
            expires_at: link.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repositories::{UserRepository, test_pool};
    use std::collections::HashSet;

    #[test]
    fn test_link_id_shape() {
        let id = generate_link_id();
        // 16 bytes -> 22 base64 characters without padding
        assert_eq!(id.len(), 22);
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_password_shape() {
        for _ in 0..100 {
            let password = generate_password();
            assert_eq!(password.len(), PASSWORD_LEN);
            assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_ids_do_not_repeat() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_link_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn test_issue_persists_link_with_seven_day_expiry() -> DatabaseResult<()> {
        let pool = test_pool().await;
        let clock = Arc::new(ManualClock::fixed());
        UserRepository::new(pool.clone())
            .create_pending("alice", clock.now())
            .await?;
        let links = CertLinkRepository::new(pool);
        let issuer = LinkIssuer::new(links.clone(), clock.clone(), Duration::days(7));

        let issued = issuer.issue("alice", Platform::Ios).await?;
        assert_eq!(issued.expires_at, clock.now() + Duration::days(7));

        let stored = links.find_by_id(&issued.link_id).await?.expect("stored");
        assert_eq!(stored.username, "alice");
        assert_eq!(stored.platform, Platform::Ios);
        assert_eq!(stored.password, issued.password);
        assert_eq!(stored.expires_at, issued.expires_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_issuance_yields_unrelated_links() -> DatabaseResult<()> {
        let pool = test_pool().await;
        let clock = Arc::new(ManualClock::fixed());
        UserRepository::new(pool.clone())
            .create_pending("alice", clock.now())
            .await?;
        let issuer = LinkIssuer::new(CertLinkRepository::new(pool), clock, Duration::days(7));

        let first = issuer.issue("alice", Platform::Pc).await?;
        let second = issuer.issue("alice", Platform::Pc).await?;
        assert_ne!(first.link_id, second.link_id);
        Ok(())
    }
}
