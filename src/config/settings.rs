// file: src/config/settings.rs
// version: 1.0.0
// guid: b2c3d4e5-f6a7-8901-2345-678901bcdef0

//! Provisioning settings: everything that is fixed per appliance build

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::error::ProvisionError;

/// Top-level provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProvisionSettings {
    #[validate(nested)]
    pub disk: DiskSettings,
    pub paths: PathSettings,
    #[validate(nested)]
    pub packages: PackageSettings,
    #[validate(nested)]
    pub database: DatabaseSettings,
    pub agent: AgentSettings,
    pub firewall: FirewallSettings,
    pub services: ServiceSettings,
    #[validate(nested)]
    pub hardening: HardeningSettings,
    pub report: ReportSettings,
    /// Delete the provisioning binary once the run completes
    pub self_remove: bool,
}

/// Disk sizing requirements, in GiB
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DiskSettings {
    /// Minimum size of the data partition
    #[validate(range(min = 1))]
    pub min_data_gb: u64,
    /// Size kept for the system partition
    #[validate(range(min = 1))]
    pub reserved_system_gb: u64,
    #[validate(length(min = 1))]
    pub system_fs_type: String,
    #[validate(length(min = 1))]
    pub data_fs_type: String,
    /// lsblk TYPE values considered as candidates
    #[validate(length(min = 1))]
    pub device_types: Vec<String>,
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            min_data_gb: 90,
            reserved_system_gb: 4,
            system_fs_type: "xfs".to_string(),
            data_fs_type: "xfs".to_string(),
            device_types: vec!["disk".to_string()],
        }
    }
}

/// Filesystem locations touched by the run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub fstab: PathBuf,
    pub marker: PathBuf,
    pub agent_config: PathBuf,
    pub psk_file: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/log"),
            log_dir: PathBuf::from("/var/log"),
            fstab: PathBuf::from("/etc/fstab"),
            marker: PathBuf::from("/var/lib/firstboot/provisioned.json"),
            agent_config: PathBuf::from("/etc/agent/agent.conf"),
            psk_file: PathBuf::from("/etc/agent/agent.psk"),
        }
    }
}

/// Package installation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PackageSettings {
    #[validate(length(min = 1))]
    pub manager: String,
    #[validate(length(min = 1))]
    pub install: Vec<String>,
    #[validate(nested)]
    pub retry: RetrySettings,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            manager: "dnf".to_string(),
            install: vec![
                "mariadb-server".to_string(),
                "agent-proxy-mysql".to_string(),
                "chrony".to_string(),
                "firewalld".to_string(),
                "acl".to_string(),
            ],
            retry: RetrySettings::default(),
        }
    }
}

/// Bounded retry for transient failures
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 10,
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Database engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseSettings {
    #[validate(length(min = 1))]
    pub service: String,
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(length(min = 1))]
    pub client: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            service: "mariadb".to_string(),
            name: "agent_proxy".to_string(),
            client: "mysql".to_string(),
        }
    }
}

/// Monitoring agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub service: String,
    /// System account the agent runs as; owns the pre-shared key file
    pub user: String,
    /// Group allowed to read the agent config
    pub group: String,
    /// Listening port, opened inbound by the firewall stage
    pub listen_port: u16,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            service: "agent-proxy".to_string(),
            user: "agent-proxy".to_string(),
            group: "agent-proxy".to_string(),
            listen_port: 10051,
        }
    }
}

/// Firewall policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallSettings {
    /// Additional inbound TCP ports besides the agent port
    pub inbound_tcp_ports: Vec<u16>,
    /// Destination networks reachable outbound
    pub allowed_egress: Vec<String>,
    /// Extra destinations appended to the egress allow list
    pub extra_egress: Vec<String>,
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            inbound_tcp_ports: vec![80, 443],
            allowed_egress: vec![
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
                "fc00::/7".to_string(),
            ],
            extra_egress: Vec::new(),
        }
    }
}

/// Service enable/disable settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub disable: Vec<String>,
    pub time_sync: String,
    pub time_sync_config: PathBuf,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            disable: vec![
                "sshd".to_string(),
                "cups".to_string(),
                "ModemManager".to_string(),
                "bluetooth".to_string(),
                "avahi-daemon".to_string(),
            ],
            time_sync: "chronyd".to_string(),
            time_sync_config: PathBuf::from("/etc/chrony.conf"),
        }
    }
}

/// Lockdown settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HardeningSettings {
    #[validate(length(min = 1, max = 32))]
    pub log_account: String,
    #[validate(range(min = 12, max = 128))]
    pub password_length: usize,
    #[validate(length(min = 1))]
    pub nologin_shell: String,
    #[validate(length(min = 1))]
    pub privileged_account: String,
}

impl Default for HardeningSettings {
    fn default() -> Self {
        Self {
            log_account: "logreader".to_string(),
            password_length: 20,
            nologin_shell: "/sbin/nologin".to_string(),
            privileged_account: "root".to_string(),
        }
    }
}

/// Final report settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub ticket_instruction: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            ticket_instruction:
                "Open a network ticket to reserve an IP address for the MAC addresses above."
                    .to_string(),
        }
    }
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            disk: DiskSettings::default(),
            paths: PathSettings::default(),
            packages: PackageSettings::default(),
            database: DatabaseSettings::default(),
            agent: AgentSettings::default(),
            firewall: FirewallSettings::default(),
            services: ServiceSettings::default(),
            hardening: HardeningSettings::default(),
            report: ReportSettings::default(),
            self_remove: true,
        }
    }
}

impl ProvisionSettings {
    /// Copy with every written file relocated under `root`.
    ///
    /// Used by dry runs so rendered files can be inspected without touching
    /// the real system.
    pub fn staged_under(&self, root: &Path) -> Self {
        let rebase = |path: &Path| -> PathBuf {
            root.join(path.strip_prefix("/").unwrap_or(path))
        };

        let mut staged = self.clone();
        staged.paths = PathSettings {
            data_dir: rebase(&self.paths.data_dir),
            log_dir: rebase(&self.paths.log_dir),
            fstab: rebase(&self.paths.fstab),
            marker: rebase(&self.paths.marker),
            agent_config: rebase(&self.paths.agent_config),
            psk_file: rebase(&self.paths.psk_file),
        };
        staged.services.time_sync_config = rebase(&self.services.time_sync_config);
        staged.self_remove = false;
        staged
    }

    /// Validate the settings
    pub fn validate_settings(&self) -> crate::Result<()> {
        self.validate()
            .map_err(|e| ProvisionError::config(format!("Invalid settings: {}", e)))?;

        for package in &self.packages.install {
            crate::security::validation::ValidationUtils::validate_package_name(package)
                .map_err(|e| ProvisionError::config(e.to_string()))?;
        }

        let paths = [
            ("data_dir", &self.paths.data_dir),
            ("log_dir", &self.paths.log_dir),
            ("fstab", &self.paths.fstab),
            ("marker", &self.paths.marker),
            ("agent_config", &self.paths.agent_config),
            ("psk_file", &self.paths.psk_file),
        ];
        for (name, path) in paths {
            if !path.is_absolute() {
                return Err(ProvisionError::config(format!(
                    "paths.{} must be absolute: {}",
                    name,
                    path.display()
                )));
            }
        }

        if self.paths.data_dir == self.paths.log_dir {
            return Err(ProvisionError::config(
                "paths.data_dir and paths.log_dir must differ",
            ));
        }

        if self.agent.listen_port == 0 {
            return Err(ProvisionError::config("agent.listen_port cannot be 0"));
        }

        let owners = [
            ("agent.user", &self.agent.user),
            ("agent.group", &self.agent.group),
        ];
        for (field, name) in owners {
            crate::security::validation::ValidationUtils::validate_username(name)
                .map_err(|e| ProvisionError::config(format!("{}: {}", field, e)))?;
        }

        for net in self.firewall.allowed_egress.iter().chain(&self.firewall.extra_egress) {
            crate::security::validation::ValidationUtils::validate_cidr(net)
                .map_err(|e| ProvisionError::config(e.to_string()))?;
        }

        Ok(())
    }
}
