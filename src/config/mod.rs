// file: src/config/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-7a8b-9c0d-1e2f3a4b5c6d

//! Configuration module for the first-boot provisioner
//!
//! Settings are fixed per appliance build and loaded from YAML/TOML;
//! parameters are collected from the operator at run time.

pub mod loader;
pub mod params;
pub mod settings;

pub use loader::ConfigLoader;
pub use params::{DatabaseCredentials, ProvisioningParameters};
pub use settings::{
    AgentSettings, DatabaseSettings, DiskSettings, FirewallSettings, HardeningSettings,
    PackageSettings, PathSettings, ProvisionSettings, ReportSettings, RetrySettings,
    ServiceSettings,
};
