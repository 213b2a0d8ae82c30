//! Service configuration
//!
//! Built-in defaults overlaid by unprefixed environment variables
//! (`DATABASE_URL`, `CERT_DIR`, `PLATFORM_POLICY`, ...).

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Duration;
use common::database::DatabaseConfig;
use config::{Config, ConfigError, Environment};
use rand::rngs::OsRng;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use subtle::ConstantTimeEq;

use crate::validator::{PlatformPolicy, RedemptionPolicy};

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub bind_address: String,
    pub database_url: String,
    pub database_max_connections: u32,
    #[serde(default)]
    pub redis_url: Option<String>,
    pub cert_dir: PathBuf,
    /// Prefix of distributed links, e.g. `https://vpn.example.com`
    pub public_base_url: String,
    pub admin_username: String,
    #[serde(default)]
    pub admin_password_hash: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    pub link_ttl_days: i64,
    pub session_ttl_seconds: i64,
    pub secure_cookies: bool,
    pub platform_policy: PlatformPolicy,
    pub redemption_policy: RedemptionPolicy,
    pub provision_command: PathBuf,
    /// Where the provisioning tool drops the generated bundles
    pub provision_output_dir: PathBuf,
    pub expiry_sweep_interval_seconds: u64,
    pub log_json: bool,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_address", &self.bind_address)
            .field("database_url", &self.database_url)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("cert_dir", &self.cert_dir)
            .field("public_base_url", &self.public_base_url)
            .field("admin_username", &self.admin_username)
            .field("link_ttl_days", &self.link_ttl_days)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("platform_policy", &self.platform_policy)
            .field("redemption_policy", &self.redemption_policy)
            .field("provision_command", &self.provision_command)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Load from defaults and the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default())
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .set_default("bind_address", "0.0.0.0:5000")?
            .set_default("database_url", "sqlite://vpn_users.db")?
            .set_default("database_max_connections", 5_i64)?
            .set_default("cert_dir", "certificates")?
            .set_default("public_base_url", "http://localhost:5000")?
            .set_default("admin_username", "admin")?
            .set_default("link_ttl_days", 7_i64)?
            .set_default("session_ttl_seconds", 86_400_i64)?
            .set_default("secure_cookies", false)?
            .set_default("platform_policy", "flexible")?
            .set_default("redemption_policy", "unlimited")?
            .set_default("provision_command", "ikev2.sh")?
            .set_default("provision_output_dir", "/root")?
            .set_default("expiry_sweep_interval_seconds", 3_600_i64)?
            .set_default("log_json", false)?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.link_ttl_days <= 0 {
            return Err(ConfigError::Message("LINK_TTL_DAYS must be positive".into()));
        }
        if self.session_ttl_seconds <= 0 {
            return Err(ConfigError::Message(
                "SESSION_TTL_SECONDS must be positive".into(),
            ));
        }
        if self.expiry_sweep_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "EXPIRY_SWEEP_INTERVAL_SECONDS must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            database_url: self.database_url.clone(),
            max_connections: self.database_max_connections,
        }
    }

    pub fn link_ttl(&self) -> Duration {
        Duration::days(self.link_ttl_days)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl_seconds)
    }

    /// Public URL of a link
    pub fn link_url(&self, link_id: &str) -> String {
        format!(
            "{}/cert/{}",
            self.public_base_url.trim_end_matches('/'),
            link_id
        )
    }

    /// Resolve the admin credential, hashing a plain password if that is
    /// all that was configured
    pub fn admin_credentials(&self) -> Result<AdminCredentials, ConfigError> {
        let password_hash = match (&self.admin_password_hash, &self.admin_password) {
            (Some(hash), _) => {
                PasswordHash::new(hash).map_err(|e| {
                    ConfigError::Message(format!("ADMIN_PASSWORD_HASH is not a PHC string: {}", e))
                })?;
                hash.clone()
            }
            (None, Some(password)) => hash_password(password)
                .map_err(|e| ConfigError::Message(format!("Failed to hash password: {}", e)))?,
            (None, None) => {
                return Err(ConfigError::Message(
                    "ADMIN_PASSWORD_HASH or ADMIN_PASSWORD must be set".into(),
                ));
            }
        };

        Ok(AdminCredentials {
            username: self.admin_username.clone(),
            password_hash,
        })
    }
}

/// Hash a password with argon2id and a random salt
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// The single administrator account
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password_hash: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl AdminCredentials {
    /// Check a login attempt. The password is verified even when the
    /// username is wrong.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let username_ok: bool = username.as_bytes().ct_eq(self.username.as_bytes()).into();
        let password_ok = PasswordHash::new(&self.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
        username_ok && password_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::load(Environment::default().source(Some(source)))
    }

    #[test]
    fn test_defaults() -> Result<(), ConfigError> {
        let config = load(&[])?;
        assert_eq!(config.bind_address, "0.0.0.0:5000");
        assert_eq!(config.database_url, "sqlite://vpn_users.db");
        assert_eq!(config.link_ttl(), Duration::days(7));
        assert_eq!(config.platform_policy, PlatformPolicy::Flexible);
        assert_eq!(config.redemption_policy, RedemptionPolicy::Unlimited);
        assert!(config.redis_url.is_none());
        assert!(!config.secure_cookies);
        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<(), ConfigError> {
        let config = load(&[
            ("PLATFORM_POLICY", "strict"),
            ("REDEMPTION_POLICY", "single_use"),
            ("LINK_TTL_DAYS", "2"),
            ("SECURE_COOKIES", "true"),
            ("PUBLIC_BASE_URL", "https://vpn.example.com/"),
        ])?;
        assert_eq!(config.platform_policy, PlatformPolicy::Strict);
        assert_eq!(config.redemption_policy, RedemptionPolicy::SingleUse);
        assert_eq!(config.link_ttl(), Duration::days(2));
        assert!(config.secure_cookies);
        assert_eq!(config.link_url("abc"), "https://vpn.example.com/cert/abc");
        Ok(())
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(load(&[("PLATFORM_POLICY", "sometimes")]).is_err());
        assert!(load(&[("LINK_TTL_DAYS", "0")]).is_err());
    }

    #[test]
    fn test_admin_credentials() -> Result<(), ConfigError> {
        assert!(load(&[])?.admin_credentials().is_err());

        let creds = load(&[("ADMIN_PASSWORD", "s3cret")])?.admin_credentials()?;
        assert!(creds.verify("admin", "s3cret"));
        assert!(!creds.verify("admin", "S3cret"));
        assert!(!creds.verify("root", "s3cret"));

        let hash = hash_password("other").map_err(|e| ConfigError::Message(e.to_string()))?;
        let creds = load(&[("ADMIN_PASSWORD_HASH", hash.as_str())])?.admin_credentials()?;
        assert!(creds.verify("admin", "other"));

        assert!(
            load(&[("ADMIN_PASSWORD_HASH", "plain")])?
                .admin_credentials()
                .is_err()
        );
        Ok(())
    }

    #[test]
    #[serial]
    fn test_from_process_environment() {
        unsafe {
            std::env::set_var("CERT_DIR", "/srv/certs");
            std::env::set_var("DATABASE_MAX_CONNECTIONS", "20");
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.cert_dir, PathBuf::from("/srv/certs"));
        assert_eq!(config.database().max_connections, 20);

        unsafe {
            std::env::remove_var("CERT_DIR");
            std::env::remove_var("DATABASE_MAX_CONNECTIONS");
        }
    }
}
