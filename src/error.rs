// file: src/error.rs
// version: 3.0.0
// guid: 57b83a63-07b6-4534-aa6c-51e8797254e0

use thiserror::Error;

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// How a failure propagates through a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort; nothing security relevant has changed, re-running is safe
    FatalPreHardening,
    /// Abort; lockdown may be partially applied, manual recovery only
    FatalPostHardening,
    /// Re-prompt the operator, never escalated
    ValidationRetry,
    /// Log and continue
    BestEffort,
}

/// Error types for the first-boot provisioner
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient disk: {0}")]
    Disk(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Package error: {0}")]
    Package(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("Account error: {0}")]
    Account(String),

    #[error("Process failed: {command} (exit code: {exit_code:?}): {stderr}")]
    Process {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Sequence violation: {0}")]
    Sequence(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Hardening failed, manual recovery required: {0}")]
    PostHardening(Box<ProvisionError>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProvisionError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new disk error
    pub fn disk(msg: impl Into<String>) -> Self {
        Self::Disk(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new package error
    pub fn package(msg: impl Into<String>) -> Self {
        Self::Package(msg.into())
    }

    /// Create a new database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new service error
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Create a new firewall error
    pub fn firewall(msg: impl Into<String>) -> Self {
        Self::Firewall(msg.into())
    }

    /// Create a new account error
    pub fn account(msg: impl Into<String>) -> Self {
        Self::Account(msg.into())
    }

    /// Create a new sequence error
    pub fn sequence(msg: impl Into<String>) -> Self {
        Self::Sequence(msg.into())
    }

    /// Wrap an error raised at or after the point of no return
    pub fn post_hardening(err: ProvisionError) -> Self {
        match err {
            already @ Self::PostHardening(_) => already,
            other => Self::PostHardening(Box::new(other)),
        }
    }

    /// Classify this error
    pub fn severity(&self) -> Severity {
        match self {
            Self::PostHardening(_) => Severity::FatalPostHardening,
            Self::Validation(_) => Severity::ValidationRetry,
            _ => Severity::FatalPreHardening,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted(_) => 130,
            _ => match self.severity() {
                Severity::FatalPostHardening => 2,
                _ => 1,
            },
        }
    }
}
