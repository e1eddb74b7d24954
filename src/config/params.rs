// file: src/config/params.rs
// version: 1.0.0
// guid: c3d4e5f6-a7b8-9012-3456-789012cdef01

//! Operator-supplied provisioning parameters

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::security::validation::ValidationUtils;
use crate::Result;

/// Database credentials for the application user
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Values collected from the operator during a provisioning run
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisioningParameters {
    /// NTP server used by the time sync daemon
    pub time_server: String,
    /// Identity the proxy registers under upstream
    pub host_identity: String,
    /// Upstream monitoring server
    pub server_address: String,
    /// Pre-shared key, exactly 32 characters
    pub psk: String,
    /// Identity presented with the PSK; defaults to the host identity
    #[serde(default)]
    pub psk_identity: String,
    pub database: DatabaseCredentials,
}

impl fmt::Debug for ProvisioningParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningParameters")
            .field("time_server", &self.time_server)
            .field("host_identity", &self.host_identity)
            .field("server_address", &self.server_address)
            .field("psk", &"<redacted>")
            .field("psk_identity", &self.psk_identity)
            .field("database", &self.database)
            .finish()
    }
}

impl ProvisioningParameters {
    /// Identity presented alongside the PSK
    pub fn effective_psk_identity(&self) -> &str {
        if self.psk_identity.is_empty() {
            &self.host_identity
        } else {
            &self.psk_identity
        }
    }

    /// Re-check every field; used for parameters that did not come through the prompts
    pub fn validate(&self) -> Result<()> {
        ValidationUtils::validate_server_address(&self.time_server)?;
        ValidationUtils::validate_hostname(&self.host_identity)?;
        ValidationUtils::validate_server_address(&self.server_address)?;
        ValidationUtils::validate_psk(&self.psk, &self.psk)?;
        if !self.psk_identity.is_empty() {
            ValidationUtils::validate_hostname(&self.psk_identity)?;
        }
        ValidationUtils::validate_db_user(&self.database.user)?;
        ValidationUtils::validate_db_password(&self.database.password, &self.database.password)?;
        Ok(())
    }
}
