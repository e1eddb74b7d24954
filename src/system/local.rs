// file: src/system/local.rs
// version: 2.0.0
// guid: local001-2345-6789-abcd-ef0123456789

//! Local command execution on the appliance being provisioned

use super::executor::CommandExecutor;
use crate::error::ProvisionError;
use crate::Result;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

/// Runs commands through `bash -c` on the local machine
#[derive(Debug, Default)]
pub struct LocalClient;

impl LocalClient {
    /// Create a new local client
    pub fn new() -> Self {
        Self
    }

    fn spawn_error(command: &str, e: std::io::Error) -> ProvisionError {
        ProvisionError::Process {
            command: command.to_string(),
            exit_code: None,
            stderr: format!("Failed to execute command: {}", e),
        }
    }

    fn check_output(command: &str, output: &Output) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }

        let exit_code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);

        error!("Command failed with exit code {:?}", exit_code);
        if !stdout.trim().is_empty() {
            error!("STDOUT: {}", stdout);
        }
        if !stderr.trim().is_empty() {
            error!("STDERR: {}", stderr);
        }

        Err(ProvisionError::Process {
            command: command.to_string(),
            exit_code,
            stderr: if stderr.is_empty() {
                stdout.to_string()
            } else {
                stderr.to_string()
            },
        })
    }

    async fn run(command: &str) -> Result<Output> {
        Command::new("bash")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Self::spawn_error(command, e))
    }
}

#[async_trait::async_trait]
impl CommandExecutor for LocalClient {
    async fn execute(&mut self, command: &str) -> Result<()> {
        debug!("Executing local command: {}", command);
        let output = Self::run(command).await?;
        Self::check_output(command, &output)?;
        debug!("Command executed successfully");
        Ok(())
    }

    async fn execute_with_output(&mut self, command: &str) -> Result<String> {
        debug!("Executing local command with output: {}", command);
        let output = Self::run(command).await?;
        Self::check_output(command, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn execute_with_stdin(&mut self, command: &str, input: &str) -> Result<()> {
        debug!("Executing local command with piped input: {}", command);

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(command, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Self::spawn_error(command, e))?;
        Self::check_output(command, &output)
    }

    async fn check_silent(&mut self, command: &str) -> Result<bool> {
        let output = Self::run(command).await?;
        Ok(output.status.success())
    }
}
