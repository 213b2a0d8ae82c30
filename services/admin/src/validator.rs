//! Access validator: decides whether a link is usable and whether a bearer
//! session has proven knowledge of its password.
//!
//! Expiry is evaluated against the injected clock on every call, including
//! for sessions that verified the password earlier, so a long-lived session
//! can never outlive its link.

use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::LinkError;
use crate::models::{CertLink, Platform};
use crate::repositories::CertLinkRepository;
use crate::session::{SessionAuthorizationCache, SessionId};

/// Whether the redemption platform must match the issuance platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformPolicy {
    /// Any platform of the link's user may be downloaded
    #[default]
    Flexible,
    /// Only the platform recorded at issuance
    Strict,
}

/// How many downloads a link allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionPolicy {
    /// Any number of downloads until expiry
    #[default]
    Unlimited,
    /// The first successful download consumes the link
    SingleUse,
}

/// Outcome of looking up a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    NotFound,
    Expired,
    Valid {
        username: String,
        platform_hint: Platform,
    },
}

/// A download the bearer is entitled to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedDownload {
    pub link_id: String,
    pub username: String,
    pub platform: Platform,
}

/// Access validator
#[derive(Clone)]
pub struct AccessValidator {
    links: CertLinkRepository,
    authorizations: SessionAuthorizationCache,
    clock: Arc<dyn Clock>,
    platform_policy: PlatformPolicy,
    redemption_policy: RedemptionPolicy,
}

impl AccessValidator {
    pub fn new(
        links: CertLinkRepository,
        authorizations: SessionAuthorizationCache,
        clock: Arc<dyn Clock>,
        platform_policy: PlatformPolicy,
        redemption_policy: RedemptionPolicy,
    ) -> Self {
        Self {
            links,
            authorizations,
            clock,
            platform_policy,
            redemption_policy,
        }
    }

    /// Fetch a link and reject it unless it is currently usable
    async fn usable_link(&self, link_id: &str) -> Result<CertLink, LinkError> {
        let link = self
            .links
            .find_by_id(link_id)
            .await?
            .ok_or(LinkError::NotFound)?;

        if !link.is_valid_at(self.clock.now()) {
            return Err(LinkError::Expired);
        }

        // A consumed single-use link behaves exactly like an expired one.
        if self.redemption_policy == RedemptionPolicy::SingleUse && link.redeemed_at.is_some() {
            return Err(LinkError::Expired);
        }

        Ok(link)
    }

    /// Classify a link as not found, expired or valid
    pub async fn resolve_link(&self, link_id: &str) -> Result<LinkStatus, LinkError> {
        match self.usable_link(link_id).await {
            Ok(link) => Ok(LinkStatus::Valid {
                username: link.username,
                platform_hint: link.platform,
            }),
            Err(LinkError::NotFound) => Ok(LinkStatus::NotFound),
            Err(LinkError::Expired) => Ok(LinkStatus::Expired),
            Err(e) => Err(e),
        }
    }

    /// Verify a submitted password and, on success, authorize the session
    /// for this link only.
    ///
    /// Returns `false` for a wrong password as well as for unknown or
    /// expired links; the caller must not tell these apart to the bearer.
    pub async fn check_password(
        &self,
        session: &SessionId,
        link_id: &str,
        submitted: &str,
    ) -> Result<bool, LinkError> {
        let link = match self.usable_link(link_id).await {
            Ok(link) => link,
            Err(LinkError::NotFound | LinkError::Expired) => return Ok(false),
            Err(e) => return Err(e),
        };

        let matches: bool = link
            .password
            .as_bytes()
            .ct_eq(submitted.as_bytes())
            .into();
        if !matches {
            warn!(link_id = %link_id, "Incorrect link password");
            return Ok(false);
        }

        self.authorizations
            .grant(session, link_id)
            .await
            .map_err(LinkError::SessionStore)?;
        info!(link_id = %link_id, "Link password verified");
        Ok(true)
    }

    /// True iff this session verified this exact link and the link is still
    /// usable
    pub async fn is_authorized(&self, session: &SessionId, link_id: &str) -> Result<bool, LinkError> {
        match self.usable_link(link_id).await {
            Ok(_) => self
                .authorizations
                .is_granted(session, link_id)
                .await
                .map_err(LinkError::SessionStore),
            Err(LinkError::NotFound | LinkError::Expired) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Validate a download request end to end: link usable, session
    /// authorized, platform acceptable under the configured policy.
    pub async fn authorize_download(
        &self,
        session: &SessionId,
        link_id: &str,
        platform: &str,
    ) -> Result<AuthorizedDownload, LinkError> {
        let link = self.usable_link(link_id).await?;

        let granted = self
            .authorizations
            .is_granted(session, link_id)
            .await
            .map_err(LinkError::SessionStore)?;
        if !granted {
            return Err(LinkError::Unauthorized);
        }

        let platform: Platform = platform.parse()?;
        if self.platform_policy == PlatformPolicy::Strict && platform != link.platform {
            warn!(
                link_id = %link_id,
                issued = %link.platform,
                requested = %platform,
                "Platform does not match the link"
            );
            return Err(LinkError::InvalidPlatform(platform.to_string()));
        }

        Ok(AuthorizedDownload {
            link_id: link.id,
            username: link.username,
            platform,
        })
    }

    /// Account for a completed download
    ///
    /// Under [`RedemptionPolicy::SingleUse`] this consumes the link; losing a
    /// race against a concurrent redemption yields [`LinkError::Expired`].
    pub async fn record_redemption(&self, download: &AuthorizedDownload) -> Result<(), LinkError> {
        if self.redemption_policy == RedemptionPolicy::Unlimited {
            return Ok(());
        }

        if self
            .links
            .mark_redeemed(&download.link_id, self.clock.now())
            .await?
        {
            info!(link_id = %download.link_id, "Single-use link redeemed");
            Ok(())
        } else {
            Err(LinkError::Expired)
        }
    }
}
