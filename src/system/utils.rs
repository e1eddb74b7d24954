// file: src/system/utils.rs
// version: 2.0.0
// guid: w3x4y5z6-a7b8-9012-3456-789012wxyzab

//! System utility functions

use crate::error::ProvisionError;
use crate::Result;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

/// Hardware identity of one network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NicIdentity {
    pub name: String,
    pub mac: String,
}

/// System utility functions
pub struct SystemUtils;

impl SystemUtils {
    /// Check if a command exists in PATH
    pub fn command_exists(command: &str) -> bool {
        which::which(command).is_ok()
    }

    /// Tools the provisioning run shells out to
    pub fn required_commands(package_manager: &str, db_client: &str) -> Vec<String> {
        let mut commands: Vec<String> = [
            "lsblk",
            "mount",
            "mountpoint",
            "systemctl",
            "firewall-cmd",
            "setfacl",
            "useradd",
            "usermod",
            "passwd",
            "chpasswd",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        commands.push(package_manager.to_string());
        commands.push(db_client.to_string());
        commands
    }

    /// Return the subset of `commands` missing from PATH
    pub fn check_prerequisites(commands: &[String]) -> Vec<String> {
        commands
            .iter()
            .filter(|cmd| !Self::command_exists(cmd))
            .cloned()
            .collect()
    }

    /// Check if running as root
    pub fn is_root() -> bool {
        #[cfg(unix)]
        {
            unsafe { libc::geteuid() == 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// MAC addresses of physical-looking interfaces, sorted by name
    pub fn network_identities() -> Result<Vec<NicIdentity>> {
        let interfaces = NetworkInterface::show().map_err(|e| {
            ProvisionError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to enumerate network interfaces: {}", e),
            ))
        })?;

        let mut nics = Self::filter_identities(
            interfaces
                .into_iter()
                .map(|iface| (iface.name, iface.mac_addr)),
        );
        nics.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} network interfaces with hardware addresses", nics.len());
        Ok(nics)
    }

    /// Drop loopback, MAC-less and all-zero entries; de-duplicate per interface
    pub fn filter_identities<I>(interfaces: I) -> Vec<NicIdentity>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut nics: Vec<NicIdentity> = Vec::new();
        for (name, mac) in interfaces {
            let Some(mac) = mac else { continue };
            if name == "lo" || mac.is_empty() || mac == "00:00:00:00:00:00" {
                continue;
            }
            // show() reports one entry per address family
            if nics.iter().any(|n| n.name == name) {
                continue;
            }
            nics.push(NicIdentity {
                name,
                mac: mac.to_lowercase(),
            });
        }
        nics
    }

    /// Resolved path of the running provisioning binary
    pub fn own_path() -> Result<PathBuf> {
        let exe = std::env::current_exe()?;
        Ok(exe.canonicalize().unwrap_or(exe))
    }
}
