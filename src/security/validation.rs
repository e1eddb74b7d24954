// file: src/security/validation.rs
// version: 2.0.0
// guid: r8s9t0u1-v2w3-4567-8901-234567rstuvw

//! Input validation utilities
//!
//! Every check here is a pure function returning `ProvisionError::Validation`
//! so the interactive collector can re-prompt on failure.

use crate::error::ProvisionError;
use crate::Result;
use std::net::IpAddr;

/// Required pre-shared key length in characters
pub const PSK_LENGTH: usize = 32;

/// Minimum length for the database application password
pub const MIN_DB_PASSWORD_LENGTH: usize = 8;

/// Utility functions for input validation
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate hostname format
    pub fn validate_hostname(hostname: &str) -> Result<()> {
        if hostname.is_empty() {
            return Err(ProvisionError::validation("Hostname cannot be empty"));
        }

        if hostname.len() > 253 {
            return Err(ProvisionError::validation(
                "Hostname cannot exceed 253 characters",
            ));
        }

        if !hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(ProvisionError::validation(
                "Hostname contains invalid characters",
            ));
        }

        if hostname.starts_with('-') || hostname.ends_with('-') {
            return Err(ProvisionError::validation(
                "Hostname cannot start or end with hyphen",
            ));
        }

        // A single trailing dot is the FQDN root, anything else must be a real label
        let trimmed = hostname.strip_suffix('.').unwrap_or(hostname);
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(ProvisionError::validation(
                    "Hostname cannot contain empty labels",
                ));
            }
            if label.len() > 63 {
                return Err(ProvisionError::validation(
                    "Hostname label cannot exceed 63 characters",
                ));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(ProvisionError::validation(format!(
                    "Hostname label '{}' cannot start or end with hyphen",
                    label
                )));
            }
        }

        Ok(())
    }

    /// Validate a server address: an IPv4/IPv6 literal or a hostname
    pub fn validate_server_address(address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ProvisionError::validation("Server address cannot be empty"));
        }

        let unbracketed = address
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .unwrap_or(address);
        if unbracketed.parse::<IpAddr>().is_ok() {
            return Ok(());
        }

        if address.contains(':') {
            return Err(ProvisionError::validation(format!(
                "Invalid IPv6 address: {}",
                address
            )));
        }

        // Dotted numbers that failed IP parsing are a mistyped IPv4, not a hostname
        let looks_numeric = address
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_digit()));
        if looks_numeric {
            return Err(ProvisionError::validation(format!(
                "Invalid IPv4 address: {}",
                address
            )));
        }

        Self::validate_hostname(address)
    }

    /// Validate a pre-shared key against its confirmation entry
    pub fn validate_psk(psk: &str, confirmation: &str) -> Result<()> {
        if psk != confirmation {
            return Err(ProvisionError::validation(
                "Pre-shared key and confirmation do not match",
            ));
        }

        let length = psk.chars().count();
        if length != PSK_LENGTH {
            return Err(ProvisionError::validation(format!(
                "Pre-shared key must be exactly {} characters (got {})",
                PSK_LENGTH, length
            )));
        }

        if psk.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ProvisionError::validation(
                "Pre-shared key cannot contain whitespace",
            ));
        }

        Ok(())
    }

    /// Validate database user name
    pub fn validate_db_user(user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(ProvisionError::validation("Database user cannot be empty"));
        }

        if user.len() > 32 {
            return Err(ProvisionError::validation(
                "Database user cannot exceed 32 characters",
            ));
        }

        if !user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ProvisionError::validation(
                "Database user may only contain letters, digits and underscore",
            ));
        }

        if user == "root" {
            return Err(ProvisionError::validation(
                "Database user must be a dedicated application account, not root",
            ));
        }

        Ok(())
    }

    /// Validate database password against its confirmation entry
    pub fn validate_db_password(password: &str, confirmation: &str) -> Result<()> {
        if password != confirmation {
            return Err(ProvisionError::validation(
                "Database password and confirmation do not match",
            ));
        }

        if password.chars().count() < MIN_DB_PASSWORD_LENGTH {
            return Err(ProvisionError::validation(format!(
                "Database password must be at least {} characters",
                MIN_DB_PASSWORD_LENGTH
            )));
        }

        // Quotes and backslashes would have to survive SQL and config quoting
        if password
            .chars()
            .any(|c| c == '\'' || c == '"' || c == '\\' || c.is_control())
        {
            return Err(ProvisionError::validation(
                "Database password cannot contain quotes, backslashes or control characters",
            ));
        }

        Ok(())
    }

    /// Validate a package name: explicit names only, no globbing
    pub fn validate_package_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ProvisionError::validation("Package name cannot be empty"));
        }

        if name.chars().any(|c| matches!(c, '*' | '?' | '[' | ']')) {
            return Err(ProvisionError::validation(format!(
                "Wildcard package names are not allowed: {}",
                name
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
        {
            return Err(ProvisionError::validation(format!(
                "Package name contains invalid characters: {}",
                name
            )));
        }

        Ok(())
    }

    /// Validate a CIDR network like `10.0.0.0/8`
    pub fn validate_cidr(cidr: &str) -> Result<()> {
        let (addr, prefix) = cidr.split_once('/').ok_or_else(|| {
            ProvisionError::validation(format!("Network must be in CIDR form: {}", cidr))
        })?;

        let ip: IpAddr = addr.parse().map_err(|_| {
            ProvisionError::validation(format!("Invalid network address: {}", cidr))
        })?;

        let prefix: u8 = prefix.parse().map_err(|_| {
            ProvisionError::validation(format!("Invalid prefix length: {}", cidr))
        })?;

        let max = if ip.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(ProvisionError::validation(format!(
                "Prefix length out of range: {}",
                cidr
            )));
        }

        Ok(())
    }

    /// Validate a local account name
    pub fn validate_username(username: &str) -> Result<()> {
        if username.is_empty() {
            return Err(ProvisionError::validation("Username cannot be empty"));
        }

        if username.len() > 32 {
            return Err(ProvisionError::validation(
                "Username cannot exceed 32 characters",
            ));
        }

        let first = username.chars().next().unwrap_or('-');
        if !first.is_ascii_lowercase() && first != '_' {
            return Err(ProvisionError::validation(
                "Username must start with lowercase letter or underscore",
            ));
        }

        if !username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ProvisionError::validation(
                "Username contains invalid characters",
            ));
        }

        Ok(())
    }
}
