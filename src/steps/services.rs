// file: src/steps/services.rs
// version: 1.0.0
// guid: sv000001-2345-6789-abcd-ef0123456789

//! Service state changes and time synchronization

use crate::error::ProvisionError;
use crate::recovery::{RetryAttempt, RetryPolicy};
use crate::system::{shell_quote, CommandExecutor};
use crate::Result;
use std::path::Path;
use tracing::{debug, info, warn};

/// Observed state of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub name: String,
    pub enabled: bool,
    pub running: bool,
}

/// Outcome of disabling one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled,
    /// Installed but already disabled and stopped
    AlreadyDisabled,
    /// Unit not installed on this image
    Absent,
    /// Present but the change failed; logged and skipped
    Failed(String),
}

/// Enables, disables and inspects systemd units
pub struct ServiceManager<'a> {
    exec: &'a mut dyn CommandExecutor,
}

impl<'a> ServiceManager<'a> {
    pub fn new(exec: &'a mut dyn CommandExecutor) -> Self {
        Self { exec }
    }

    /// Current enabled/running state of `name`
    pub async fn state(&mut self, name: &str) -> Result<ServiceState> {
        let unit = shell_quote(name);
        let enabled = self
            .exec
            .check_silent(&format!("systemctl is-enabled --quiet {}", unit))
            .await?;
        let running = self
            .exec
            .check_silent(&format!("systemctl is-active --quiet {}", unit))
            .await?;
        Ok(ServiceState {
            name: name.to_string(),
            enabled,
            running,
        })
    }

    /// Enable and start `name`; failures are fatal
    pub async fn enable_now(&mut self, name: &str) -> Result<()> {
        info!("Enabling and starting {}", name);
        self.exec
            .execute(&format!("systemctl enable --now {}", shell_quote(name)))
            .await
            .map_err(|e| ProvisionError::service(format!("Failed to start {}: {}", name, e)))
    }

    /// Enable and start `name` under a retry policy
    pub async fn enable_now_with_retry(
        &mut self,
        name: &str,
        policy: &RetryPolicy,
        history: &mut Vec<RetryAttempt>,
    ) -> Result<()> {
        let command = format!("systemctl enable --now {}", shell_quote(name));
        info!("Enabling and starting {}", name);
        policy
            .execute(&mut *self.exec, &format!("start {}", name), &command, history)
            .await
            .map_err(|e| ProvisionError::service(format!("Failed to start {}: {}", name, e)))
    }

    /// Restart `name` so it picks up new configuration
    pub async fn restart(&mut self, name: &str) -> Result<()> {
        info!("Restarting {}", name);
        self.exec
            .execute(&format!("systemctl restart {}", shell_quote(name)))
            .await
            .map_err(|e| ProvisionError::service(format!("Failed to restart {}: {}", name, e)))
    }

    /// Disable and stop `name`; absence and failure are not fatal
    pub async fn disable_best_effort(&mut self, name: &str) -> DisableOutcome {
        let unit = shell_quote(name);
        match self
            .exec
            .check_silent(&format!("systemctl cat {} >/dev/null 2>&1", unit))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Service {} is not installed, skipping", name);
                return DisableOutcome::Absent;
            }
            Err(e) => {
                warn!("Could not query {}: {}", name, e);
                return DisableOutcome::Failed(e.to_string());
            }
        }

        match self.state(name).await {
            Ok(state) if !state.enabled && !state.running => {
                debug!("Service {} is already disabled and stopped", name);
                return DisableOutcome::AlreadyDisabled;
            }
            Ok(state) => debug!(
                "Service {} enabled={} running={}",
                state.name, state.enabled, state.running
            ),
            Err(e) => warn!("Could not read state of {}: {}", name, e),
        }

        match self
            .exec
            .execute(&format!("systemctl disable --now {}", unit))
            .await
        {
            Ok(()) => {
                info!("Disabled {}", name);
                DisableOutcome::Disabled
            }
            Err(e) => {
                warn!("Failed to disable {}, continuing: {}", name, e);
                DisableOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Point the time sync daemon config at `server`.
///
/// Other active `server`/`pool` lines are commented out; the managed line is
/// kept exactly once.
pub fn apply_time_server(content: &str, server: &str) -> String {
    let wanted = format!("server {} iburst", server);
    let mut found = false;
    let mut lines: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        let directive = trimmed.split_whitespace().next().unwrap_or("");
        if directive != "server" && directive != "pool" {
            lines.push(line.to_string());
            continue;
        }
        if trimmed == wanted && !found {
            found = true;
            lines.push(wanted.clone());
        } else if trimmed != wanted {
            lines.push(format!("#{}", line));
        }
    }

    if !found {
        lines.insert(0, wanted);
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Write the time server into `config` and restart `service`
pub async fn configure_time_sync(
    exec: &mut dyn CommandExecutor,
    config: &Path,
    service: &str,
    server: &str,
) -> Result<()> {
    let current = match tokio::fs::read_to_string(config).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(ProvisionError::service(format!(
                "Failed to read {}: {}",
                config.display(),
                e
            )))
        }
    };

    let updated = apply_time_server(&current, server);
    if updated != current {
        if let Some(parent) = config.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(config, &updated).await.map_err(|e| {
            ProvisionError::service(format!("Failed to write {}: {}", config.display(), e))
        })?;
        info!("Time server set to {} in {}", server, config.display());
    }

    let mut services = ServiceManager::new(exec);
    services.enable_now(service).await?;
    services.restart(service).await
}
