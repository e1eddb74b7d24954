// file: src/steps/packages.rs
// version: 1.0.0
// guid: pk000001-2345-6789-abcd-ef0123456789

//! Package installation, database setup and agent configuration

use crate::config::{DatabaseCredentials, ProvisionSettings, ProvisioningParameters};
use crate::error::ProvisionError;
use crate::recovery::{RetryAttempt, RetryPolicy};
use crate::security::secrets::{sha256_hex, write_restricted};
use crate::security::validation::ValidationUtils;
use crate::steps::agent_config::render_agent_config;
use crate::steps::services::{configure_time_sync, ServiceManager};
use crate::system::{shell_quote, CommandExecutor};
use crate::Result;
use std::path::Path;
use tracing::{info, warn};

/// Mode of the pre-shared key file
pub const PSK_FILE_MODE: u32 = 0o600;

/// Mode of the rendered agent config, which holds the database password
pub const AGENT_CONFIG_MODE: u32 = 0o640;

/// What the configurator changed
#[derive(Debug, Clone, Default)]
pub struct ConfigureOutcome {
    /// sha256 of the rendered agent config
    pub config_sha256: String,
    pub agent_config_changed: bool,
    pub retries: Vec<RetryAttempt>,
}

/// SQL creating the application database and its dedicated user.
///
/// Every statement is safe to repeat; existing data is never dropped.
/// Credentials have already been validated to contain no quotes or
/// backslashes.
pub fn database_setup_sql(db_name: &str, credentials: &DatabaseCredentials) -> String {
    format!(
        "CREATE DATABASE IF NOT EXISTS `{db}` CHARACTER SET utf8mb4 COLLATE utf8mb4_bin;\n\
         CREATE USER IF NOT EXISTS '{user}'@'localhost' IDENTIFIED BY '{password}';\n\
         ALTER USER '{user}'@'localhost' IDENTIFIED BY '{password}';\n\
         GRANT ALL PRIVILEGES ON `{db}`.* TO '{user}'@'localhost';\n\
         FLUSH PRIVILEGES;\n",
        db = db_name,
        user = credentials.user,
        password = credentials.password,
    )
}

/// Installs software and writes derived configuration
pub struct PackageConfigurator<'a> {
    exec: &'a mut dyn CommandExecutor,
    settings: &'a ProvisionSettings,
    policy: RetryPolicy,
    history: Vec<RetryAttempt>,
}

impl<'a> PackageConfigurator<'a> {
    pub fn new(exec: &'a mut dyn CommandExecutor, settings: &'a ProvisionSettings) -> Self {
        Self {
            exec,
            settings,
            policy: RetryPolicy::from(&settings.packages.retry),
            history: Vec::new(),
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the whole configurator stage
    pub async fn configure(mut self, params: &ProvisioningParameters) -> Result<ConfigureOutcome> {
        self.install_packages().await?;
        self.start_database().await?;
        self.create_database(&params.database).await?;
        self.write_psk(&params.psk).await?;
        let (config_sha256, agent_config_changed) = self.write_agent_config(params).await?;

        configure_time_sync(
            &mut *self.exec,
            &self.settings.services.time_sync_config,
            &self.settings.services.time_sync,
            &params.time_server,
        )
        .await?;

        let mut services = ServiceManager::new(&mut *self.exec);
        services.enable_now(&self.settings.agent.service).await?;
        services.restart(&self.settings.agent.service).await?;

        Ok(ConfigureOutcome {
            config_sha256,
            agent_config_changed,
            retries: self.history,
        })
    }

    /// Package manager command for the configured list
    pub fn install_command(&self) -> String {
        let packages: Vec<String> = self
            .settings
            .packages
            .install
            .iter()
            .map(|p| shell_quote(p))
            .collect();
        format!(
            "{} install -y {}",
            shell_quote(&self.settings.packages.manager),
            packages.join(" ")
        )
    }

    /// Install every configured package; exhausting retries is fatal
    pub async fn install_packages(&mut self) -> Result<()> {
        let packages = &self.settings.packages.install;
        if packages.is_empty() {
            return Err(ProvisionError::package("No packages configured for installation"));
        }
        for package in packages {
            ValidationUtils::validate_package_name(package)
                .map_err(|e| ProvisionError::package(e.to_string()))?;
        }

        info!("Installing {} packages: {}", packages.len(), packages.join(", "));
        let command = self.install_command();
        self.policy
            .execute(&mut *self.exec, "package install", &command, &mut self.history)
            .await
            .map_err(|e| ProvisionError::package(format!("Package installation failed: {}", e)))
    }

    /// Enable and start the database engine
    pub async fn start_database(&mut self) -> Result<()> {
        let service = &self.settings.database.service;
        ServiceManager::new(&mut *self.exec)
            .enable_now_with_retry(service, &self.policy, &mut self.history)
            .await
            .map_err(|e| ProvisionError::database(e.to_string()))
    }

    /// Create the application database and user if absent
    pub async fn create_database(&mut self, credentials: &DatabaseCredentials) -> Result<()> {
        let db = &self.settings.database;
        info!(
            "Ensuring database {} and user {} exist",
            db.name, credentials.user
        );
        let sql = database_setup_sql(&db.name, credentials);
        let command = format!("{} --batch", shell_quote(&db.client));
        self.exec
            .execute_with_stdin(&command, &sql)
            .await
            .map_err(|e| {
                ProvisionError::database(format!("Failed to create database {}: {}", db.name, e))
            })
    }

    /// Write the pre-shared key, readable only by the agent account
    pub async fn write_psk(&mut self, psk: &str) -> Result<()> {
        let settings = self.settings;
        let path = &settings.paths.psk_file;
        write_restricted(path, format!("{}\n", psk).as_bytes(), PSK_FILE_MODE)
            .await
            .map_err(|e| {
                ProvisionError::config(format!("Failed to write {}: {}", path.display(), e))
            })?;

        let agent = &settings.agent;
        self.change_owner(path, &agent.user, &agent.group).await?;
        info!(
            "Pre-shared key written to {} (owner {})",
            path.display(),
            agent.user
        );
        Ok(())
    }

    /// Hand `path` to `user:group` without touching its mode
    async fn change_owner(&mut self, path: &Path, user: &str, group: &str) -> Result<()> {
        let command = format!(
            "chown {} {}",
            shell_quote(&format!("{}:{}", user, group)),
            shell_quote(&path.to_string_lossy())
        );
        self.exec.execute(&command).await.map_err(|e| {
            ProvisionError::config(format!(
                "Failed to give {} to {}:{}: {}",
                path.display(),
                user,
                group,
                e
            ))
        })
    }

    /// Substitute parameters into the installed agent config.
    ///
    /// Returns the sha256 of the result and whether the file changed.
    pub async fn write_agent_config(
        &mut self,
        params: &ProvisioningParameters,
    ) -> Result<(String, bool)> {
        let settings = self.settings;
        let path = &settings.paths.agent_config;
        let template = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "{} not found, writing managed keys only",
                    path.display()
                );
                String::new()
            }
            Err(e) => {
                return Err(ProvisionError::config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let rendered = render_agent_config(&template, params, settings);
        let digest = sha256_hex(rendered.as_bytes());
        let changed = rendered != template;

        write_restricted(path, rendered.as_bytes(), AGENT_CONFIG_MODE)
            .await
            .map_err(|e| {
                ProvisionError::config(format!("Failed to write {}: {}", path.display(), e))
            })?;
        self.change_owner(path, "root", &settings.agent.group).await?;

        if changed {
            info!("Agent config {} updated (sha256 {})", path.display(), digest);
        } else {
            info!("Agent config {} already up to date", path.display());
        }
        Ok((digest, changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::RecordingExecutor;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings(root: &Path) -> ProvisionSettings {
        let mut settings = ProvisionSettings::default();
        settings.paths.agent_config = root.join("etc/agent/agent.conf");
        settings.paths.psk_file = root.join("etc/agent/agent.psk");
        settings.services.time_sync_config = root.join("etc/chrony.conf");
        settings
    }

    fn params() -> ProvisioningParameters {
        ProvisioningParameters {
            time_server: "ntp.example.net".to_string(),
            host_identity: "proxy-01".to_string(),
            server_address: "10.0.0.5".to_string(),
            psk: "0123456789abcdef0123456789abcdef".to_string(),
            psk_identity: String::new(),
            database: DatabaseCredentials {
                user: "agent".to_string(),
                password: "db-password-1".to_string(),
            },
        }
    }

    #[test]
    fn test_database_sql_never_drops() {
        let sql = database_setup_sql("agent_proxy", &params().database);

        assert!(sql.contains("CREATE DATABASE IF NOT EXISTS `agent_proxy`"));
        assert!(sql.contains("CREATE USER IF NOT EXISTS 'agent'@'localhost'"));
        assert!(sql.contains("ON `agent_proxy`.* TO 'agent'@'localhost'"));
        assert!(!sql.to_uppercase().contains("DROP"));
    }

    #[test]
    fn test_install_command_lists_every_package() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let mut exec = RecordingExecutor::new();

        let cmd = PackageConfigurator::new(&mut exec, &settings).install_command();

        assert_eq!(
            cmd,
            "dnf install -y mariadb-server agent-proxy-mysql chrony firewalld acl"
        );
    }

    #[tokio::test]
    async fn test_configure_runs_in_order() {
        // Arrange
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let mut exec = RecordingExecutor::new();

        // Act
        let outcome = PackageConfigurator::new(&mut exec, &settings)
            .configure(&params())
            .await
            .unwrap();

        // Assert
        let install = exec.position_of("dnf install").unwrap();
        let db_start = exec.position_of("enable --now mariadb").unwrap();
        let db_create = exec.position_of("mysql --batch").unwrap();
        let agent = exec.position_of("restart agent-proxy").unwrap();
        assert!(install < db_start && db_start < db_create && db_create < agent);
        assert_eq!(outcome.config_sha256.len(), 64);
        assert!(outcome.agent_config_changed);
    }

    #[tokio::test]
    async fn test_secrets_only_travel_on_stdin() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let mut exec = RecordingExecutor::new();

        PackageConfigurator::new(&mut exec, &settings)
            .configure(&params())
            .await
            .unwrap();

        assert!(exec
            .commands()
            .iter()
            .all(|c| !c.command.contains("db-password-1") && !c.command.contains("0123456789abcdef")));
        let db = exec
            .commands()
            .iter()
            .find(|c| c.command.starts_with("mysql"))
            .unwrap();
        assert!(db.stdin.as_deref().unwrap().contains("IDENTIFIED BY 'db-password-1'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_psk_file_is_owned_by_agent() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let mut exec = RecordingExecutor::new();

        PackageConfigurator::new(&mut exec, &settings)
            .write_psk("0123456789abcdef0123456789abcdef")
            .await
            .unwrap();

        let meta = std::fs::metadata(&settings.paths.psk_file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert_eq!(
            std::fs::read_to_string(&settings.paths.psk_file).unwrap(),
            "0123456789abcdef0123456789abcdef\n"
        );
        let chown = format!(
            "chown agent-proxy:agent-proxy {}",
            settings.paths.psk_file.display()
        );
        assert_eq!(exec.count_of(&chown), 1);
    }

    #[tokio::test]
    async fn test_agent_config_is_group_readable_by_agent() {
        let tmp = TempDir::new().unwrap();
        let mut settings = settings(tmp.path());
        settings.agent.group = "proxy".to_string();
        let mut exec = RecordingExecutor::new();

        PackageConfigurator::new(&mut exec, &settings)
            .write_agent_config(&params())
            .await
            .unwrap();

        let chown = format!("chown root:proxy {}", settings.paths.agent_config.display());
        assert_eq!(exec.count_of(&chown), 1);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(&settings.paths.agent_config).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        }
    }

    #[tokio::test]
    async fn test_unknown_agent_account_fails_psk_write() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let mut exec = RecordingExecutor::new().fail("chown", "invalid user: 'agent-proxy'");

        let err = PackageConfigurator::new(&mut exec, &settings)
            .write_psk("0123456789abcdef0123456789abcdef")
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Config(_)));
        assert!(err.to_string().contains("agent-proxy"));
    }

    #[tokio::test]
    async fn test_package_failure_is_fatal_after_retries() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let mut exec = RecordingExecutor::new().fail("dnf install", "Cannot download repomd.xml");

        let err = PackageConfigurator::new(&mut exec, &settings)
            .with_policy(RetryPolicy::new(3, Duration::ZERO))
            .configure(&params())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Package(_)));
        assert_eq!(exec.count_of("dnf install"), 3);
        assert_eq!(exec.count_of("mysql"), 0);
        assert!(!settings.paths.psk_file.exists());
    }

    #[tokio::test]
    async fn test_database_creation_is_not_retried() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let mut exec = RecordingExecutor::new().fail("mysql --batch", "Access denied");

        let err = PackageConfigurator::new(&mut exec, &settings)
            .with_policy(RetryPolicy::new(3, Duration::ZERO))
            .configure(&params())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Database(_)));
        assert_eq!(exec.count_of("mysql --batch"), 1);
    }

    #[tokio::test]
    async fn test_agent_config_rewrite_is_stable() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        std::fs::create_dir_all(settings.paths.agent_config.parent().unwrap()).unwrap();
        std::fs::write(&settings.paths.agent_config, "Server=127.0.0.1\nHostname=x\n").unwrap();
        let mut exec = RecordingExecutor::new();
        let mut configurator = PackageConfigurator::new(&mut exec, &settings);

        let (first, changed_first) = configurator.write_agent_config(&params()).await.unwrap();
        let (second, changed_second) = configurator.write_agent_config(&params()).await.unwrap();

        assert!(changed_first);
        assert!(!changed_second);
        assert_eq!(first, second);
    }
}
