//! Input validation utilities
//!
//! Usernames end up in file names and in the argument list of the
//! provisioning tool, so they are restricted to a safe character set.

use regex::Regex;
use std::sync::OnceLock;

pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_DISPLAY_NAME_LEN: usize = 128;

/// Validate a VPN username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }

    if username.len() > MAX_USERNAME_LEN {
        return Err(format!(
            "Username must be at most {} characters long",
            MAX_USERNAME_LEN
        ));
    }

    static USERNAME_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = USERNAME_REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").ok());

    match regex {
        Some(regex) if regex.is_match(username) => {}
        _ => {
            return Err(
                "Username can only contain letters, numbers, underscores and hyphens".to_string(),
            );
        }
    }

    if username.starts_with('-') {
        return Err("Username cannot start with a hyphen".to_string());
    }

    Ok(())
}

/// Validate a display name; `None` clears it
pub fn validate_display_name(display_name: Option<&str>) -> Result<(), String> {
    let Some(name) = display_name else {
        return Ok(());
    };

    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(format!(
            "Display name must be at most {} characters long",
            MAX_DISPLAY_NAME_LEN
        ));
    }

    if name.chars().any(char::is_control) {
        return Err("Display name cannot contain control characters".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_usernames() {
        for name in ["alice", "bob_2", "ops-team", "A"] {
            assert!(validate_username(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_usernames() {
        for name in ["", "../etc/passwd", "a b", "alice;rm", "-addclient", "ålice"] {
            assert!(validate_username(name).is_err(), "{name} should be rejected");
        }
        assert!(validate_username(&"x".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_display_names() {
        assert!(validate_display_name(None).is_ok());
        assert!(validate_display_name(Some("Алиса")).is_ok());
        assert!(validate_display_name(Some("line\nbreak")).is_err());
        assert!(validate_display_name(Some(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1))).is_err());
    }
}
