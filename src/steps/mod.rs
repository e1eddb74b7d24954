// file: src/steps/mod.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-bcdef234567

//! Provisioning stages and the state machine that orders them

pub mod accounts;
pub mod agent_config;
pub mod collector;
pub mod firewall;
pub mod hardening;
pub mod marker;
pub mod packages;
pub mod preflight;
pub mod services;
pub mod storage;

use crate::error::ProvisionError;
use crate::Result;
use serde::Serialize;
use std::fmt;

/// Position of a provisioning run in its one-way sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ProvisionStage {
    Start,
    DiskValidated,
    StorageBound,
    ParametersCollected,
    PackagesConfigured,
    Hardened,
    Reported,
    SelfRemoved,
}

impl ProvisionStage {
    /// The only stage reachable from this one
    pub fn next(self) -> Option<ProvisionStage> {
        use ProvisionStage::*;
        match self {
            Start => Some(DiskValidated),
            DiskValidated => Some(StorageBound),
            StorageBound => Some(ParametersCollected),
            ParametersCollected => Some(PackagesConfigured),
            PackagesConfigured => Some(Hardened),
            Hardened => Some(Reported),
            Reported => Some(SelfRemoved),
            SelfRemoved => None,
        }
    }

    /// Move to `to`, which must be the direct successor
    pub fn advance(&mut self, to: ProvisionStage) -> Result<()> {
        if self.next() != Some(to) {
            return Err(ProvisionError::sequence(format!(
                "cannot move from {} to {}",
                self, to
            )));
        }
        *self = to;
        Ok(())
    }

    /// Whether work done from this stage on can leave lockdown partially applied.
    ///
    /// Hardening starts once packages are configured, so a failure or
    /// interrupt from that point needs manual inspection.
    pub fn is_past_point_of_no_return(self) -> bool {
        self >= ProvisionStage::PackagesConfigured
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStage::Start => "start",
            ProvisionStage::DiskValidated => "disk validated",
            ProvisionStage::StorageBound => "storage bound",
            ProvisionStage::ParametersCollected => "parameters collected",
            ProvisionStage::PackagesConfigured => "packages configured",
            ProvisionStage::Hardened => "hardened",
            ProvisionStage::Reported => "reported",
            ProvisionStage::SelfRemoved => "self removed",
        };
        f.write_str(name)
    }
}
