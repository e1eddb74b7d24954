// file: src/cli/args.rs
// version: 2.0.0
// guid: f6g7h8i9-j0k1-2345-6789-012345fghijk

//! Command line argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "firstboot-provision")]
#[command(about = "Attended first-boot provisioning for monitoring proxy appliances")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full provisioning sequence
    Run {
        /// Settings file (YAML or TOML)
        #[arg(short, long, env = "FIRSTBOOT_CONFIG")]
        config: Option<PathBuf>,

        /// Probe and prompt, but only log the changes that would be made
        #[arg(long)]
        dry_run: bool,

        /// Do not delete the provisioning binary at the end
        #[arg(long)]
        keep_binary: bool,
    },

    /// Select the target disk and print the planned layout
    Preflight {
        #[arg(short, long, env = "FIRSTBOOT_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show whether this machine was already provisioned
    Status {
        #[arg(short, long, env = "FIRSTBOOT_CONFIG")]
        config: Option<PathBuf>,

        /// Read this marker file instead of the configured one
        #[arg(long)]
        marker: Option<PathBuf>,
    },

    /// Print a freshly generated pre-shared key
    GeneratePsk,

    /// Render the agent config from a template and a parameters file
    RenderConfig {
        /// Agent config template
        #[arg(short, long)]
        template: PathBuf,

        /// Parameters file (YAML or TOML)
        #[arg(short, long)]
        params: PathBuf,

        #[arg(short, long, env = "FIRSTBOOT_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Check that the external tools used by a run are installed
    CheckPrereqs {
        #[arg(short, long, env = "FIRSTBOOT_CONFIG")]
        config: Option<PathBuf>,
    },
}
