//! Certificate link model and platform enumeration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Target platform of a certificate artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Pc,
    Ios,
    Android,
}

/// Platform value outside the fixed enumeration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Pc, Platform::Ios, Platform::Android];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Pc => "pc",
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }

    /// File extension of the bundle the provisioning tool produces
    pub fn extension(&self) -> &'static str {
        match self {
            Platform::Pc => "p12",
            Platform::Ios => "mobileconfig",
            Platform::Android => "sswan",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Platform::Pc => "application/x-pkcs12",
            Platform::Ios => "application/x-apple-aspen-config",
            Platform::Android => "application/vnd.strongswan.profile",
        }
    }

    /// Per-user artifact file name, e.g. `alice.mobileconfig`
    pub fn file_name(&self, username: &str) -> String {
        format!("{}.{}", username, self.extension())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pc" => Ok(Platform::Pc),
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability token granting password-gated access to one user's artifacts
#[derive(Clone)]
pub struct CertLink {
    pub id: String,
    pub username: String,
    pub platform: Platform,
    pub password: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl CertLink {
    /// A link is usable strictly before its expiry instant
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// The password never reaches logs.
impl fmt::Debug for CertLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertLink")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("platform", &self.platform)
            .field("password", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("redeemed_at", &self.redeemed_at)
            .finish()
    }
}

/// Link listing entry shown to administrators
#[derive(Debug, Clone, Serialize)]
pub struct CertLinkSummary {
    pub id: String,
    pub platform: Platform,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

impl CertLinkSummary {
    pub fn from_link(link: &CertLink, now: DateTime<Utc>) -> Self {
        Self {
            id: link.id.clone(),
            platform: link.platform,
            expires_at: link.expires_at,
            created_at: link.created_at,
            redeemed_at: link.redeemed_at,
            expired: !link.is_valid_at(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_platform_parsing_is_exact() {
        assert_eq!("pc".parse::<Platform>(), Ok(Platform::Pc));
        assert_eq!("ios".parse::<Platform>(), Ok(Platform::Ios));
        assert_eq!("android".parse::<Platform>(), Ok(Platform::Android));

        for bad in ["", "PC", "Ios", "windows", "ios ", "../pc"] {
            assert_eq!(
                bad.parse::<Platform>(),
                Err(UnknownPlatform(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(Platform::Pc.file_name("alice"), "alice.p12");
        assert_eq!(Platform::Ios.file_name("alice"), "alice.mobileconfig");
        assert_eq!(Platform::Android.file_name("alice"), "alice.sswan");
    }

    #[test]
    fn test_validity_boundary() {
        let now = Utc::now();
        let link = CertLink {
            id: "id".to_string(),
            username: "alice".to_string(),
            platform: Platform::Ios,
            password: "Secret12".to_string(),
            expires_at: now + Duration::days(7),
            created_at: now,
            redeemed_at: None,
        };

        assert!(link.is_valid_at(now));
        assert!(!link.is_valid_at(link.expires_at));
        assert!(!link.is_valid_at(now + Duration::days(8)));
    }

    #[test]
    fn test_debug_redacts_password() {
        let now = Utc::now();
        let link = CertLink {
            id: "id".to_string(),
            username: "alice".to_string(),
            platform: Platform::Pc,
            password: "Secret12".to_string(),
            expires_at: now,
            created_at: now,
            redeemed_at: None,
        };

        let rendered = format!("{:?}", link);
        assert!(!rendered.contains("Secret12"));
        assert!(rendered.contains("<redacted>"));
    }
}
