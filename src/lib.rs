// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # First-boot provisioner
//!
//! Attended, one-shot provisioning of a monitoring proxy appliance:
//! validates the target disk, binds the data volume over the log
//! directory, collects operator parameters, installs and configures the
//! database and agent, then locks the appliance down in a fixed order and
//! removes itself.

pub mod cli;
pub mod config;
pub mod error;
pub mod installer;
pub mod logging;
pub mod recovery;
pub mod reporter;
pub mod security;
pub mod steps;
pub mod system;

pub use error::{ProvisionError, Result};

/// Version information for the provisioner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
