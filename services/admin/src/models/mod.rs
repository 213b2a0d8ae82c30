//! Admin service models

pub mod cert_link;
pub mod user;

// Re-export for convenience
pub use cert_link::{CertLink, CertLinkSummary, Platform, UnknownPlatform};
pub use user::{LoginCredentials, NewUser, ProvisionStatus, UpdateDisplayName, VpnUser};

use chrono::{DateTime, Utc};

/// Timestamps are persisted as unix seconds
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
