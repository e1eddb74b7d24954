// file: src/steps/hardening.rs
// version: 1.0.0
// guid: hd000001-2345-6789-abcd-ef0123456789

//! Ordered lockdown of the appliance.
//!
//! Steps run strictly in order: firewall, service disabling, access
//! account, privileged lockout. The lockout needs a [`LockoutClearance`],
//! which only [`HardeningSequencer::clearance`] hands out, and only once
//! the three earlier steps have succeeded. Nothing here is retried.

use crate::config::{ProvisionSettings, ProvisioningParameters};
use crate::error::ProvisionError;
use crate::security::secrets::generate_password;
use crate::steps::accounts::{AccessAccount, AccountManager};
use crate::steps::firewall::{egress_exception, plan, FirewallManager};
use crate::steps::services::{DisableOutcome, ServiceManager};
use crate::system::{shell_quote, CommandExecutor};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use tracing::{error, info, warn};

/// One hardening step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HardeningStep {
    Firewall,
    Services,
    Account,
    Lockout,
}

impl fmt::Display for HardeningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardeningStep::Firewall => "firewall",
            HardeningStep::Services => "services",
            HardeningStep::Account => "access account",
            HardeningStep::Lockout => "privileged lockout",
        };
        f.write_str(name)
    }
}

/// Completed step with its position and timing
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: HardeningStep,
    pub sequence: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Proof that firewall, services and account steps all succeeded
#[derive(Debug)]
pub struct LockoutClearance {
    _private: (),
}

/// Result of a full hardening pass
#[derive(Clone)]
pub struct HardeningReport {
    pub steps: Vec<StepRecord>,
    pub disabled_services: Vec<(String, DisableOutcome)>,
    pub account: AccessAccount,
    /// Generated account password, shown once in the final report
    pub password: String,
}

impl fmt::Debug for HardeningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardeningReport")
            .field("steps", &self.steps)
            .field("disabled_services", &self.disabled_services)
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl HardeningReport {
    pub fn record(&self, step: HardeningStep) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step == step)
    }
}

/// Runs the lockdown steps in their fixed order
pub struct HardeningSequencer<'a> {
    exec: &'a mut dyn CommandExecutor,
    settings: &'a ProvisionSettings,
    steps: Vec<StepRecord>,
    lockout_attempted: bool,
}

impl<'a> HardeningSequencer<'a> {
    pub fn new(exec: &'a mut dyn CommandExecutor, settings: &'a ProvisionSettings) -> Self {
        Self {
            exec,
            settings,
            steps: Vec::new(),
            lockout_attempted: false,
        }
    }

    fn is_done(&self, step: HardeningStep) -> bool {
        self.steps.iter().any(|r| r.step == step)
    }

    fn require(&self, before: HardeningStep, step: HardeningStep) -> Result<()> {
        if self.is_done(before) {
            Ok(())
        } else {
            Err(ProvisionError::sequence(format!(
                "{} attempted before {} succeeded",
                step, before
            )))
        }
    }

    fn finish(&mut self, step: HardeningStep, started_at: DateTime<Utc>) {
        let record = StepRecord {
            step,
            sequence: self.steps.len(),
            started_at,
            finished_at: Utc::now(),
        };
        info!("Hardening step {} complete: {}", record.sequence + 1, step);
        self.steps.push(record);
    }

    /// Step 1: default-deny firewall
    pub async fn apply_firewall(&mut self, params: &ProvisioningParameters) -> Result<()> {
        let started_at = Utc::now();
        info!("Applying default-deny firewall policy");

        let firewall = &self.settings.firewall;
        let mut exceptions: Vec<String> = Vec::new();
        for address in [&params.server_address, &params.time_server] {
            match egress_exception(address, firewall) {
                Some(rule) => {
                    info!("Allowing egress to {} ({})", address, rule);
                    exceptions.push(rule);
                }
                None if address
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .parse::<IpAddr>()
                    .is_err() =>
                {
                    warn!(
                        "{} is a hostname; it must resolve inside the allowed egress networks",
                        address
                    )
                }
                None => {}
            }
        }
        let rules = plan(
            &self.settings.firewall,
            self.settings.agent.listen_port,
            &exceptions,
        );
        FirewallManager::new(&mut *self.exec).apply(&rules).await?;

        self.finish(HardeningStep::Firewall, started_at);
        Ok(())
    }

    /// Step 2: disable non-essential services, best effort per service
    pub async fn disable_services(&mut self) -> Result<Vec<(String, DisableOutcome)>> {
        self.require(HardeningStep::Firewall, HardeningStep::Services)?;
        let started_at = Utc::now();
        info!("Disabling non-essential services");

        let mut outcomes = Vec::new();
        let mut services = ServiceManager::new(&mut *self.exec);
        for name in &self.settings.services.disable {
            let outcome = services.disable_best_effort(name).await;
            outcomes.push((name.clone(), outcome));
        }

        self.finish(HardeningStep::Services, started_at);
        Ok(outcomes)
    }

    /// Step 3: restricted log-reading account
    pub async fn create_access_account(&mut self, password: &str) -> Result<AccessAccount> {
        self.require(HardeningStep::Services, HardeningStep::Account)?;
        let started_at = Utc::now();

        let account =
            AccessAccount::from_settings(&self.settings.hardening, &self.settings.paths);
        AccountManager::new(&mut *self.exec)
            .provision(&account, password)
            .await?;

        self.finish(HardeningStep::Account, started_at);
        Ok(account)
    }

    /// Clearance for the lockout, available once and only after steps 1-3
    pub fn clearance(&self) -> Result<LockoutClearance> {
        self.require(HardeningStep::Firewall, HardeningStep::Lockout)?;
        self.require(HardeningStep::Services, HardeningStep::Lockout)?;
        self.require(HardeningStep::Account, HardeningStep::Lockout)?;
        if self.lockout_attempted {
            return Err(ProvisionError::sequence(
                "privileged lockout has already been attempted",
            ));
        }
        Ok(LockoutClearance { _private: () })
    }

    /// Step 4: the point of no return.
    ///
    /// Locks the privileged account's password and replaces its shell.
    /// Runs at most once per sequencer, even if it fails part way.
    pub async fn lock_privileged_account(&mut self, _clearance: LockoutClearance) -> Result<()> {
        if self.lockout_attempted {
            return Err(ProvisionError::sequence(
                "privileged lockout has already been attempted",
            ));
        }
        self.lockout_attempted = true;

        let started_at = Utc::now();
        let hardening = &self.settings.hardening;
        let account = shell_quote(&hardening.privileged_account);
        warn!(
            "Locking interactive access for {}; this cannot be undone by this tool",
            hardening.privileged_account
        );

        for command in [
            format!("passwd -l {}", account),
            format!("usermod -s {} {}", shell_quote(&hardening.nologin_shell), account),
        ] {
            if let Err(e) = self.exec.execute(&command).await {
                error!("Privileged lockout failed at '{}': {}", command, e);
                return Err(ProvisionError::account(format!(
                    "Failed to lock {}: {}",
                    hardening.privileged_account, e
                )));
            }
        }

        self.finish(HardeningStep::Lockout, started_at);
        Ok(())
    }

    /// Run every step in order
    pub async fn run(mut self, params: &ProvisioningParameters) -> Result<HardeningReport> {
        let password = generate_password(self.settings.hardening.password_length);

        self.apply_firewall(params).await?;
        let disabled_services = self.disable_services().await?;
        let account = self.create_access_account(&password).await?;

        let clearance = self.clearance()?;
        self.lock_privileged_account(clearance).await?;

        Ok(HardeningReport {
            steps: self.steps,
            disabled_services,
            account,
            password,
        })
    }
}
