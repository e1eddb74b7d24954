// file: src/steps/marker.rs
// version: 1.0.0
// guid: mk000001-2345-6789-abcd-ef0123456789

//! Completion marker recording that provisioning already ran

use crate::error::ProvisionError;
use crate::security::secrets::write_restricted;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Contents of the completion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub run_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub host_identity: String,
    /// sha256 of the agent config written by the run
    pub config_sha256: String,
    pub tool_version: String,
}

impl CompletionMarker {
    pub fn new(run_id: Uuid, host_identity: impl Into<String>, config_sha256: impl Into<String>) -> Self {
        Self {
            run_id,
            completed_at: Utc::now(),
            host_identity: host_identity.into(),
            config_sha256: config_sha256.into(),
            tool_version: crate::VERSION.to_string(),
        }
    }
}

/// What was found at the marker path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    Absent,
    Present(CompletionMarker),
    /// File exists but could not be parsed; still counts as provisioned
    Unreadable(String),
}

impl MarkerState {
    pub fn is_provisioned(&self) -> bool {
        !matches!(self, MarkerState::Absent)
    }
}

/// Inspect the marker at `path`
pub async fn read_marker(path: &Path) -> MarkerState {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str::<CompletionMarker>(&content) {
            Ok(marker) => MarkerState::Present(marker),
            Err(e) => {
                warn!(
                    "Completion marker {} exists but is not readable: {}",
                    path.display(),
                    e
                );
                MarkerState::Unreadable(e.to_string())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => MarkerState::Absent,
        Err(e) => {
            warn!(
                "Completion marker {} exists but is not readable: {}",
                path.display(),
                e
            );
            MarkerState::Unreadable(e.to_string())
        }
    }
}

/// Persist `marker` at `path`, creating parent directories
pub async fn write_marker(path: &Path, marker: &CompletionMarker) -> Result<()> {
    let json = serde_json::to_string_pretty(marker)?;
    write_restricted(path, format!("{}\n", json).as_bytes(), 0o644)
        .await
        .map_err(|e| {
            ProvisionError::config(format!(
                "Failed to write completion marker {}: {}",
                path.display(),
                e
            ))
        })?;
    info!("Completion marker written to {}", path.display());
    Ok(())
}
