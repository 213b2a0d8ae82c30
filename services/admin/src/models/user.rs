//! VPN user model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Outcome of the external provisioning step for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    /// Row written, tool not yet finished
    Pending,
    Ready,
    Failed,
}

impl ProvisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStatus::Pending => "pending",
            ProvisionStatus::Ready => "ready",
            ProvisionStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProvisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProvisionStatus::Pending),
            "ready" => Ok(ProvisionStatus::Ready),
            "failed" => Ok(ProvisionStatus::Failed),
            other => Err(format!("unknown provision status: {}", other)),
        }
    }
}

/// VPN user entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnUser {
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub provision_status: ProvisionStatus,
}

/// New user creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
}

/// Display name update payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDisplayName {
    pub display_name: Option<String>,
}

/// Admin login credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}
