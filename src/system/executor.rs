// file: src/system/executor.rs
// version: 2.0.0
// guid: exec0001-2345-6789-abcd-ef0123456789

//! Command execution trait shared by the live system and test doubles

use crate::Result;

/// Trait for executing external commands on the appliance
#[async_trait::async_trait]
pub trait CommandExecutor: Send {
    /// Execute command, failing on non-zero exit
    async fn execute(&mut self, command: &str) -> Result<()>;

    /// Execute command and return stdout
    async fn execute_with_output(&mut self, command: &str) -> Result<String>;

    /// Execute command with `input` written to its stdin.
    ///
    /// Used for secrets; implementations must never log `input`.
    async fn execute_with_stdin(&mut self, command: &str, input: &str) -> Result<()>;

    /// Execute a command intended as a boolean check
    async fn check_silent(&mut self, command: &str) -> Result<bool>;
}

/// Quote a value for safe interpolation into a `bash -c` command line
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ','))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
