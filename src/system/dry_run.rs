// file: src/system/dry_run.rs
// version: 1.0.0
// guid: dry00001-2345-6789-abcd-ef0123456789

//! Executor for `--dry-run`: read-only probes run for real, changes are
//! only logged.

use super::executor::CommandExecutor;
use super::recording::is_mutating;
use crate::Result;
use tracing::info;

/// Wraps a real executor and suppresses every mutating command
#[derive(Debug)]
pub struct DryRunExecutor<E> {
    inner: E,
    planned: Vec<String>,
}

impl<E: CommandExecutor> DryRunExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            planned: Vec::new(),
        }
    }

    /// Mutating commands that were suppressed, in order
    pub fn planned(&self) -> &[String] {
        &self.planned
    }

    fn suppress(&mut self, command: &str) {
        info!("DRY RUN: {}", command);
        self.planned.push(command.to_string());
    }
}

#[async_trait::async_trait]
impl<E: CommandExecutor> CommandExecutor for DryRunExecutor<E> {
    async fn execute(&mut self, command: &str) -> Result<()> {
        if is_mutating(command) {
            self.suppress(command);
            return Ok(());
        }
        self.inner.execute(command).await
    }

    async fn execute_with_output(&mut self, command: &str) -> Result<String> {
        if is_mutating(command) {
            self.suppress(command);
            return Ok(String::new());
        }
        self.inner.execute_with_output(command).await
    }

    async fn execute_with_stdin(&mut self, command: &str, _input: &str) -> Result<()> {
        self.suppress(command);
        Ok(())
    }

    async fn check_silent(&mut self, command: &str) -> Result<bool> {
        if is_mutating(command) {
            self.suppress(command);
            return Ok(true);
        }
        self.inner.check_silent(command).await
    }
}
