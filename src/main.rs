// file: src/main.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-234567hijklm

//! First-boot provisioner - main entry point

use anyhow::Context;
use clap::Parser;
use firstboot_provisioner::{
    cli::{
        args::{Cli, Commands},
        commands::*,
    },
    installer::ProvisionState,
    logging::logger,
    steps::collector::restore_terminal_echo,
    ProvisionError,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, warn};

/// Exit status for an operator interrupt
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<ProvisionError>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match &cli.log_file {
        Some(path) => logger::init_logger_with_file(cli.verbose, cli.quiet, path),
        None => logger::init_logger(cli.verbose, cli.quiet),
    }
    .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Run {
            config,
            dry_run,
            keep_binary,
        } => {
            let provisioner = prepare_run(config.as_deref(), dry_run, keep_binary).await?;
            watch_for_interrupt(provisioner.state_handle());
            run_command(&provisioner, dry_run).await?;
        }
        Commands::Preflight { config } => preflight_command(config.as_deref()).await?,
        Commands::Status { config, marker } => {
            status_command(config.as_deref(), marker).await?;
        }
        Commands::GeneratePsk => generate_psk_command()?,
        Commands::RenderConfig {
            template,
            params,
            config,
        } => render_config_command(&template, &params, config.as_deref())?,
        Commands::CheckPrereqs { config } => check_prerequisites_command(config.as_deref())?,
    }
    Ok(())
}

/// Exit on Ctrl+C with a message that depends on how far the run got.
///
/// Runs on its own task because operator prompts block the main task.
fn watch_for_interrupt(state: Arc<RwLock<ProvisionState>>) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        restore_terminal_echo();

        let stage = state.read().await.stage;
        if stage.is_past_point_of_no_return() {
            error!(
                "MANUAL RECOVERY REQUIRED: interrupted after lockdown began (last completed stage: {})",
                stage
            );
            error!("Partial hardening may be in place; inspect firewall, accounts and services");
        } else {
            warn!(
                "Interrupted at stage '{}'; no lockdown was applied, safe to re-run",
                stage
            );
        }
        std::process::exit(i32::from(EXIT_INTERRUPTED));
    });
}
