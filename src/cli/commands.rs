// file: src/cli/commands.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-123456ghijkl

//! Command implementations for the CLI

use crate::{
    config::{ConfigLoader, ProvisionSettings},
    error::ProvisionError,
    installer::{Provisioner, RunOptions, RunOutcome},
    security::secrets::generate_psk,
    steps::agent_config::render_agent_config,
    steps::collector::ConsolePrompter,
    steps::marker::{read_marker, MarkerState},
    steps::preflight::{DiskRequirements, DiskValidator},
    system::{CommandExecutor, DryRunExecutor, LocalClient, SystemUtils},
    Result,
};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Load and validate settings, falling back to the built-in defaults
pub fn load_settings(config: Option<&Path>) -> Result<ProvisionSettings> {
    let settings = ConfigLoader::new().load_settings_or_default(config)?;
    match config {
        Some(path) => info!("Loaded settings from {}", path.display()),
        None => info!("Using built-in settings"),
    }
    Ok(settings)
}

/// Build the orchestrator for `run`.
///
/// Dry runs write every file under a scratch directory instead of the
/// real locations.
pub async fn prepare_run(
    config: Option<&Path>,
    dry_run: bool,
    keep_binary: bool,
) -> Result<Provisioner> {
    let mut settings = load_settings(config)?;

    if dry_run {
        if read_marker(&settings.paths.marker).await.is_provisioned() {
            warn!(
                "{} exists; a real run would do nothing",
                settings.paths.marker.display()
            );
        }
        let stage_root = std::env::temp_dir().join(format!(
            "firstboot-dry-run-{}",
            uuid::Uuid::new_v4()
        ));
        info!(
            "DRY RUN: files will be written under {}",
            stage_root.display()
        );
        settings = settings.staged_under(&stage_root);
    } else if !SystemUtils::is_root() {
        return Err(ProvisionError::config(
            "firstboot-provision run must be executed as root",
        ));
    }

    Ok(Provisioner::new(settings, RunOptions { keep_binary }))
}

/// Execute a prepared provisioning run against the local machine
pub async fn run_command(provisioner: &Provisioner, dry_run: bool) -> Result<()> {
    let mut prompter = ConsolePrompter::new();
    let outcome = if dry_run {
        let mut exec = DryRunExecutor::new(LocalClient::new());
        let outcome = provisioner.run(&mut exec, &mut prompter).await?;
        info!(
            "DRY RUN: {} changes would have been made",
            exec.planned().len()
        );
        outcome
    } else {
        let mut exec = LocalClient::new();
        provisioner.run(&mut exec, &mut prompter).await?
    };

    match outcome {
        RunOutcome::AlreadyProvisioned(state) => print_marker_state(&state),
        RunOutcome::Completed { run_id, marker, .. } => {
            info!(
                "Provisioning run {} completed at {}",
                run_id, marker.completed_at
            );
        }
    }
    Ok(())
}

/// Select the target disk and print the planned layout
pub async fn preflight_command(config: Option<&Path>) -> Result<()> {
    let settings = load_settings(config)?;
    let requirements = DiskRequirements::from_settings(&settings.disk, &settings.paths);

    let mut exec = LocalClient::new();
    let exec: &mut dyn CommandExecutor = &mut exec;
    let target = DiskValidator::new(exec).validate(&requirements).await?;

    println!(
        "{} {} ({})",
        "Target disk:".bold(),
        target.device.display(),
        target.capacity
    );
    for partition in &target.layout {
        println!(
            "  {:<12} {:>12}  min {:>10}  {}",
            partition.mount_point.display(),
            partition.size.to_string(),
            partition.min_size.to_string(),
            partition.fs_type
        );
    }
    println!("{}", "Disk meets the minimum requirements".green());
    Ok(())
}

/// Report whether provisioning already happened; returns true if it did
pub async fn status_command(config: Option<&Path>, marker: Option<PathBuf>) -> Result<bool> {
    let path = match marker {
        Some(path) => path,
        None => load_settings(config)?.paths.marker,
    };
    let state = read_marker(&path).await;
    print_marker_state(&state);
    Ok(state.is_provisioned())
}

fn print_marker_state(state: &MarkerState) {
    match state {
        MarkerState::Absent => println!("{}", "Not provisioned".yellow()),
        MarkerState::Present(marker) => {
            println!("{}", "Provisioned".green().bold());
            println!("  Run id:        {}", marker.run_id);
            println!("  Completed at:  {}", marker.completed_at);
            println!("  Host identity: {}", marker.host_identity);
            println!("  Config sha256: {}", marker.config_sha256);
            println!("  Tool version:  {}", marker.tool_version);
        }
        MarkerState::Unreadable(reason) => {
            println!("{}", "Provisioned (marker unreadable)".green().bold());
            println!("  {}", reason);
        }
    }
}

/// Print a new pre-shared key
pub fn generate_psk_command() -> Result<()> {
    println!("{}", generate_psk());
    Ok(())
}

/// Render the agent config for recorded parameters
pub fn render_config_command(
    template: &Path,
    params: &Path,
    config: Option<&Path>,
) -> Result<()> {
    let settings = load_settings(config)?;
    let params = ConfigLoader::new().load_parameters(params)?;
    let template_content = std::fs::read_to_string(template).map_err(|e| {
        ProvisionError::config(format!(
            "Failed to read template {}: {}",
            template.display(),
            e
        ))
    })?;

    print!("{}", render_agent_config(&template_content, &params, &settings));
    Ok(())
}

/// Check that the external tools used by a run are installed
pub fn check_prerequisites_command(config: Option<&Path>) -> Result<()> {
    let settings = load_settings(config)?;
    info!("Checking system prerequisites for provisioning");

    let required =
        SystemUtils::required_commands(&settings.packages.manager, &settings.database.client);
    let missing = SystemUtils::check_prerequisites(&required);

    if missing.is_empty() {
        info!("✓ All {} required commands are available", required.len());
    } else {
        error!("✗ Missing required commands: {}", missing.join(", "));
    }

    if SystemUtils::is_root() {
        info!("✓ Running as root");
    } else {
        info!("⚠ Not running as root - `run` will refuse to start");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::config(format!(
            "Missing {} required commands",
            missing.len()
        )))
    }
}
