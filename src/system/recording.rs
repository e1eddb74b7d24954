// file: src/system/recording.rs
// version: 1.0.0
// guid: rec00001-2345-6789-abcd-ef0123456789

//! Scriptable executor that records every command instead of running it.
//!
//! Backs the test suites: responses are matched by substring, in
//! registration order, and every call is kept with its sequence number so
//! ordering can be asserted.

use super::executor::CommandExecutor;
use crate::error::ProvisionError;
use crate::Result;

/// Commands that only read state
const READ_ONLY_PREFIXES: &[&str] = &[
    "lsblk",
    "cat ",
    "grep ",
    "mountpoint",
    "findmnt",
    "systemctl is-",
    "systemctl status",
    "systemctl cat",
    "id ",
    "getent ",
    "command -v",
    "test ",
    "firewall-cmd --state",
    "firewall-cmd --get",
    "firewall-cmd --query",
    "firewall-cmd --list",
    "rpm -q",
];

/// Whether a command changes system state
pub fn is_mutating(command: &str) -> bool {
    let command = command.trim_start();
    !READ_ONLY_PREFIXES
        .iter()
        .any(|prefix| command.starts_with(prefix))
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub sequence: usize,
    pub command: String,
    pub stdin: Option<String>,
    pub mutating: bool,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Fail { exit_code: i32, stderr: String },
    /// Fail the first `remaining` matches, then succeed with empty output
    FailTimes { remaining: u32, stderr: String },
}

/// Executor double that records commands and replays scripted replies
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    replies: Vec<(String, Reply)>,
    commands: Vec<RecordedCommand>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` to commands containing `pattern`
    pub fn respond(mut self, pattern: &str, stdout: &str) -> Self {
        self.replies
            .push((pattern.to_string(), Reply::Output(stdout.to_string())));
        self
    }

    /// Fail every command containing `pattern`
    pub fn fail(mut self, pattern: &str, stderr: &str) -> Self {
        self.replies.push((
            pattern.to_string(),
            Reply::Fail {
                exit_code: 1,
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    /// Fail the first `times` commands containing `pattern`
    pub fn fail_times(mut self, pattern: &str, times: u32, stderr: &str) -> Self {
        self.replies.push((
            pattern.to_string(),
            Reply::FailTimes {
                remaining: times,
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    /// Every command seen so far
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Commands that would have changed the system
    pub fn mutating_commands(&self) -> Vec<&RecordedCommand> {
        self.commands.iter().filter(|c| c.mutating).collect()
    }

    /// Sequence number of the first command containing `pattern`
    pub fn position_of(&self, pattern: &str) -> Option<usize> {
        self.commands
            .iter()
            .find(|c| c.command.contains(pattern))
            .map(|c| c.sequence)
    }

    /// Number of commands containing `pattern`
    pub fn count_of(&self, pattern: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| c.command.contains(pattern))
            .count()
    }

    fn record(&mut self, command: &str, stdin: Option<&str>) -> Result<String> {
        let mutating = is_mutating(command);
        self.commands.push(RecordedCommand {
            sequence: self.commands.len(),
            command: command.to_string(),
            stdin: stdin.map(str::to_string),
            mutating,
        });

        let reply = self
            .replies
            .iter_mut()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply);

        match reply {
            None => Ok(String::new()),
            Some(Reply::Output(out)) => Ok(out.clone()),
            Some(Reply::Fail { exit_code, stderr }) => Err(ProvisionError::Process {
                command: command.to_string(),
                exit_code: Some(*exit_code),
                stderr: stderr.clone(),
            }),
            Some(Reply::FailTimes { remaining, stderr }) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(ProvisionError::Process {
                        command: command.to_string(),
                        exit_code: Some(1),
                        stderr: stderr.clone(),
                    })
                } else {
                    Ok(String::new())
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&mut self, command: &str) -> Result<()> {
        self.record(command, None).map(|_| ())
    }

    async fn execute_with_output(&mut self, command: &str) -> Result<String> {
        self.record(command, None)
    }

    async fn execute_with_stdin(&mut self, command: &str, input: &str) -> Result<()> {
        self.record(command, Some(input)).map(|_| ())
    }

    async fn check_silent(&mut self, command: &str) -> Result<bool> {
        Ok(self.record(command, None).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mutating() {
        assert!(!is_mutating("lsblk -J -b"));
        assert!(!is_mutating("mountpoint -q /var/log"));
        assert!(!is_mutating("systemctl is-active mariadb"));
        assert!(is_mutating("mount --bind /data/log /var/log"));
        assert!(is_mutating("systemctl enable --now mariadb"));
        assert!(is_mutating("passwd -l root"));
    }

    #[tokio::test]
    async fn test_records_and_replays() {
        let mut exec = RecordingExecutor::new()
            .respond("lsblk", "{}")
            .fail("mount", "target is busy");

        assert_eq!(exec.execute_with_output("lsblk -J").await.unwrap(), "{}");
        assert!(exec.execute("mount --bind a b").await.is_err());
        assert!(exec.execute("true").await.is_ok());

        assert_eq!(exec.commands().len(), 3);
        assert_eq!(exec.mutating_commands().len(), 2);
        assert_eq!(exec.position_of("mount"), Some(1));
    }

    #[tokio::test]
    async fn test_fail_times_then_succeeds() {
        let mut exec = RecordingExecutor::new().fail_times("dnf", 2, "mirror timeout");

        assert!(exec.execute("dnf install -y x").await.is_err());
        assert!(exec.execute("dnf install -y x").await.is_err());
        assert!(exec.execute("dnf install -y x").await.is_ok());
        assert_eq!(exec.count_of("dnf"), 3);
    }
}
