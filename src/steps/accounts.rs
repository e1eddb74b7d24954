// file: src/steps/accounts.rs
// version: 1.0.0
// guid: au000001-2345-6789-abcd-ef0123456789

//! Restricted log-reading account

use crate::config::{HardeningSettings, PathSettings};
use crate::error::ProvisionError;
use crate::security::validation::ValidationUtils;
use crate::system::{shell_quote, CommandExecutor};
use crate::Result;
use std::path::PathBuf;
use tracing::info;

/// The log-reading identity created during hardening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessAccount {
    pub username: String,
    /// Home directory, restricted to the data/log tree
    pub home: PathBuf,
    /// Non-interactive shell
    pub shell: String,
}

impl AccessAccount {
    pub fn from_settings(hardening: &HardeningSettings, paths: &PathSettings) -> Self {
        Self {
            username: hardening.log_account.clone(),
            home: paths.data_dir.clone(),
            shell: hardening.nologin_shell.clone(),
        }
    }
}

/// Creates the access account and grants it read access by ACL
pub struct AccountManager<'a> {
    exec: &'a mut dyn CommandExecutor,
}

impl<'a> AccountManager<'a> {
    pub fn new(exec: &'a mut dyn CommandExecutor) -> Self {
        Self { exec }
    }

    pub async fn exists(&mut self, username: &str) -> Result<bool> {
        self.exec
            .check_silent(&format!("id {} >/dev/null 2>&1", shell_quote(username)))
            .await
    }

    /// Create or converge `account` and set its password.
    ///
    /// The password is only ever sent on stdin.
    pub async fn provision(&mut self, account: &AccessAccount, password: &str) -> Result<()> {
        ValidationUtils::validate_username(&account.username)
            .map_err(|e| ProvisionError::account(e.to_string()))?;

        let user = shell_quote(&account.username);
        let home = shell_quote(&account.home.to_string_lossy());
        let shell = shell_quote(&account.shell);

        let command = if self.exists(&account.username).await? {
            info!("Account {} exists, updating home and shell", account.username);
            format!("usermod -d {} -s {} {}", home, shell, user)
        } else {
            info!("Creating account {}", account.username);
            format!("useradd -M -d {} -s {} {}", home, shell, user)
        };
        self.exec
            .execute(&command)
            .await
            .map_err(|e| ProvisionError::account(format!("Failed to create {}: {}", account.username, e)))?;

        self.exec
            .execute_with_stdin("chpasswd", &format!("{}:{}\n", account.username, password))
            .await
            .map_err(|e| {
                ProvisionError::account(format!(
                    "Failed to set password for {}: {}",
                    account.username, e
                ))
            })?;

        self.grant_read_access(account).await
    }

    /// Read-only ACL on the log tree, including files created later
    pub async fn grant_read_access(&mut self, account: &AccessAccount) -> Result<()> {
        let entry = shell_quote(&format!("u:{}:rX", account.username));
        let home = shell_quote(&account.home.to_string_lossy());

        for command in [
            format!("setfacl -R -m {} {}", entry, home),
            format!("setfacl -R -d -m {} {}", entry, home),
        ] {
            self.exec.execute(&command).await.map_err(|e| {
                ProvisionError::account(format!(
                    "Failed to grant {} read access to {}: {}",
                    account.username,
                    account.home.display(),
                    e
                ))
            })?;
        }

        info!(
            "Granted {} read-only access to {}",
            account.username,
            account.home.display()
        );
        Ok(())
    }
}
