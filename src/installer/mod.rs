// file: src/installer/mod.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-abcdef123456

//! Provisioning orchestrator.
//!
//! Drives the stages strictly in order, publishes the current stage for the
//! interrupt handler and classifies failures by whether hardening had begun.

use crate::config::{ProvisionSettings, ProvisioningParameters};
use crate::error::ProvisionError;
use crate::logging::stage_span;
use crate::recovery::RetryAttempt;
use crate::reporter::FinalReport;
use crate::steps::collector::{ParameterCollector, Prompter};
use crate::steps::hardening::{HardeningReport, HardeningSequencer};
use crate::steps::marker::{read_marker, write_marker, CompletionMarker, MarkerState};
use crate::steps::packages::PackageConfigurator;
use crate::steps::preflight::{DiskRequirements, DiskValidator, TargetDisk};
use crate::steps::storage::{StorageManager, StorageOutcome};
use crate::steps::ProvisionStage;
use crate::system::utils::NicIdentity;
use crate::system::{CommandExecutor, SystemUtils};
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Preparing,
    Running,
    Completed,
    AlreadyProvisioned,
    Failed,
}

/// Shared view of a run in progress
#[derive(Debug, Clone)]
pub struct ProvisionState {
    pub run_id: Uuid,
    pub stage: ProvisionStage,
    pub status: RunStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub retries: Vec<RetryAttempt>,
}

impl ProvisionState {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            stage: ProvisionStage::Start,
            status: RunStatus::Preparing,
            started_at: chrono::Utc::now(),
            completed_at: None,
            error_message: None,
            retries: Vec::new(),
        }
    }
}

/// Run-level switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip self-removal regardless of settings
    pub keep_binary: bool,
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Marker present; nothing was touched
    AlreadyProvisioned(MarkerState),
    Completed {
        run_id: Uuid,
        target: TargetDisk,
        storage: StorageOutcome,
        marker: CompletionMarker,
        report: FinalReport,
    },
}

/// Main provisioning orchestrator
pub struct Provisioner {
    settings: ProvisionSettings,
    options: RunOptions,
    run_id: Uuid,
    state: Arc<RwLock<ProvisionState>>,
    self_path: Option<PathBuf>,
    interfaces: Option<Vec<NicIdentity>>,
}

impl Provisioner {
    pub fn new(settings: ProvisionSettings, options: RunOptions) -> Self {
        let run_id = Uuid::new_v4();
        info!("Creating provisioning run {}", run_id);
        Self {
            settings,
            options,
            run_id,
            state: Arc::new(RwLock::new(ProvisionState::new(run_id))),
            self_path: None,
            interfaces: None,
        }
    }

    /// Remove this file instead of the running executable
    pub fn with_self_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.self_path = Some(path.into());
        self
    }

    /// Report these interfaces instead of probing the host
    pub fn with_interfaces(mut self, interfaces: Vec<NicIdentity>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    /// Handle for observers such as the interrupt handler
    pub fn state_handle(&self) -> Arc<RwLock<ProvisionState>> {
        Arc::clone(&self.state)
    }

    /// Run the whole sequence, or nothing if the marker exists
    pub async fn run(
        &self,
        exec: &mut dyn CommandExecutor,
        prompter: &mut dyn Prompter,
    ) -> Result<RunOutcome> {
        let marker = read_marker(&self.settings.paths.marker).await;
        if marker.is_provisioned() {
            info!(
                "Provisioning already completed ({}), nothing to do",
                self.settings.paths.marker.display()
            );
            self.state.write().await.status = RunStatus::AlreadyProvisioned;
            return Ok(RunOutcome::AlreadyProvisioned(marker));
        }

        self.state.write().await.status = RunStatus::Running;

        match self.run_stages(exec, prompter).await {
            Ok(outcome) => {
                let mut state = self.state.write().await;
                state.status = RunStatus::Completed;
                state.completed_at = Some(chrono::Utc::now());
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Classify and log a failure, recording it in the shared state
    async fn fail(&self, err: ProvisionError) -> ProvisionError {
        let mut state = self.state.write().await;
        let err = if state.stage.is_past_point_of_no_return() {
            ProvisionError::post_hardening(err)
        } else {
            err
        };

        if matches!(err, ProvisionError::PostHardening(_)) {
            error!(
                "MANUAL RECOVERY REQUIRED: provisioning failed after lockdown began (last completed stage: {}): {}",
                state.stage, err
            );
            error!("Do not re-run blindly; inspect firewall, accounts and services first");
        } else {
            error!(
                "Provisioning aborted at stage '{}': {}",
                state.stage, err
            );
            error!("No lockdown was applied; fix the cause and re-run");
        }

        state.status = RunStatus::Failed;
        state.completed_at = Some(chrono::Utc::now());
        state.error_message = Some(err.to_string());
        err
    }

    async fn advance(&self, to: ProvisionStage) -> Result<()> {
        let mut state = self.state.write().await;
        state.stage.advance(to)?;
        info!("<== Stage complete: {}", to);
        Ok(())
    }

    async fn run_stages(
        &self,
        exec: &mut dyn CommandExecutor,
        prompter: &mut dyn Prompter,
    ) -> Result<RunOutcome> {
        let target = self
            .validate_disk(exec)
            .instrument(stage_span("preflight"))
            .await?;
        self.advance(ProvisionStage::DiskValidated).await?;

        let storage = self
            .bind_storage(exec)
            .instrument(stage_span("storage"))
            .await?;
        self.advance(ProvisionStage::StorageBound).await?;

        info!("==> Collecting provisioning parameters");
        let params = ParameterCollector::new(prompter).collect()?;
        self.advance(ProvisionStage::ParametersCollected).await?;

        let config_sha256 = self
            .configure_packages(exec, &params)
            .instrument(stage_span("packages"))
            .await?;
        self.advance(ProvisionStage::PackagesConfigured).await?;

        let hardening = self
            .harden(exec, &params)
            .instrument(stage_span("hardening"))
            .await?;
        self.advance(ProvisionStage::Hardened).await?;

        let (report, marker) = self.report(&params, &hardening, config_sha256).await?;
        self.advance(ProvisionStage::Reported).await?;

        self.remove_self().await?;
        self.advance(ProvisionStage::SelfRemoved).await?;

        Ok(RunOutcome::Completed {
            run_id: self.run_id,
            target,
            storage,
            marker,
            report,
        })
    }

    async fn validate_disk(&self, exec: &mut dyn CommandExecutor) -> Result<TargetDisk> {
        info!("==> Validating target disk");
        let requirements = DiskRequirements::from_settings(&self.settings.disk, &self.settings.paths);
        DiskValidator::new(exec).validate(&requirements).await
    }

    async fn bind_storage(&self, exec: &mut dyn CommandExecutor) -> Result<StorageOutcome> {
        info!("==> Binding data directory onto the log directory");
        StorageManager::new(exec, &self.settings.paths).prepare().await
    }

    async fn configure_packages(
        &self,
        exec: &mut dyn CommandExecutor,
        params: &ProvisioningParameters,
    ) -> Result<String> {
        info!("==> Installing packages and writing configuration");
        let outcome = PackageConfigurator::new(exec, &self.settings)
            .configure(params)
            .await?;
        self.state.write().await.retries.extend(outcome.retries);
        Ok(outcome.config_sha256)
    }

    async fn harden(
        &self,
        exec: &mut dyn CommandExecutor,
        params: &ProvisioningParameters,
    ) -> Result<HardeningReport> {
        info!("==> Hardening the appliance");
        HardeningSequencer::new(exec, &self.settings).run(params).await
    }

    async fn report(
        &self,
        params: &ProvisioningParameters,
        hardening: &HardeningReport,
        config_sha256: String,
    ) -> Result<(FinalReport, CompletionMarker)> {
        info!("==> Reporting");
        let interfaces = match &self.interfaces {
            Some(list) => list.clone(),
            None => SystemUtils::network_identities().unwrap_or_else(|e| {
                warn!("Could not list network interfaces: {}", e);
                Vec::new()
            }),
        };

        let report = FinalReport {
            run_id: self.run_id,
            host_identity: params.host_identity.clone(),
            account: hardening.account.username.clone(),
            password: hardening.password.clone(),
            interfaces,
            ticket_instruction: self.settings.report.ticket_instruction.clone(),
        };
        report.print();

        let marker = CompletionMarker::new(self.run_id, &params.host_identity, config_sha256);
        write_marker(&self.settings.paths.marker, &marker).await?;
        Ok((report, marker))
    }

    async fn remove_self(&self) -> Result<()> {
        if !self.settings.self_remove || self.options.keep_binary {
            info!("Keeping the provisioning binary");
            return Ok(());
        }

        let path = match &self.self_path {
            Some(path) => path.clone(),
            None => SystemUtils::own_path()?,
        };
        info!("==> Removing {}", path.display());
        tokio::fs::remove_file(&path).await.map_err(|e| {
            ProvisionError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to remove {}: {}", path.display(), e),
            ))
        })
    }
}
