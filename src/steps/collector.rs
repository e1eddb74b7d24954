// file: src/steps/collector.rs
// version: 1.0.0
// guid: co000001-2345-6789-abcd-ef0123456789

//! Interactive collection of operator-supplied parameters.
//!
//! Every value goes through a pure validator; invalid input is reported and
//! the same question is asked again, with no retry limit. Nothing is
//! written anywhere until the full set has been accepted.

use crate::config::{DatabaseCredentials, ProvisioningParameters};
use crate::error::{ProvisionError, Severity};
use crate::security::validation::{ValidationUtils, PSK_LENGTH};
use crate::Result;
use colored::Colorize;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use tracing::info;

/// Source of operator answers
pub trait Prompter {
    /// Ask a question and return the answer without the trailing newline
    fn read_line(&mut self, prompt: &str) -> Result<String>;

    /// Ask for a secret; the answer is not echoed to the terminal
    fn read_secret(&mut self, prompt: &str) -> Result<String>;

    /// Show a message to the operator
    fn notify(&mut self, message: &str);
}

/// Prompter bound to the process terminal
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    pub fn new() -> Self {
        Self
    }

    fn read_stdin_line(prompt: &str) -> Result<String> {
        print!("{} ", prompt.bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(ProvisionError::Interrupted(
                "operator input closed".to_string(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Prompter for ConsolePrompter {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        Self::read_stdin_line(prompt)
    }

    fn read_secret(&mut self, prompt: &str) -> Result<String> {
        let _guard = EchoGuard::disable();
        let answer = Self::read_stdin_line(prompt);
        println!();
        answer
    }

    fn notify(&mut self, message: &str) {
        println!("{}", message.yellow());
    }
}

/// Turns terminal echo off for its lifetime
struct EchoGuard {
    #[cfg(unix)]
    original: Option<libc::termios>,
}

impl EchoGuard {
    #[cfg(unix)]
    fn disable() -> Self {
        unsafe {
            let fd = libc::STDIN_FILENO;
            if libc::isatty(fd) != 1 {
                return Self { original: None };
            }
            let mut term: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut term) != 0 {
                return Self { original: None };
            }
            let original = term;
            term.c_lflag &= !libc::ECHO;
            term.c_lflag |= libc::ECHONL;
            libc::tcsetattr(fd, libc::TCSANOW, &term);
            Self {
                original: Some(original),
            }
        }
    }

    #[cfg(not(unix))]
    fn disable() -> Self {
        Self {}
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(original) = self.original.as_ref() {
                unsafe {
                    libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, original);
                }
            }
        }
    }
}

/// Turn terminal echo back on, for exits that skip `EchoGuard`'s drop
pub fn restore_terminal_echo() {
    #[cfg(unix)]
    unsafe {
        let fd = libc::STDIN_FILENO;
        if libc::isatty(fd) != 1 {
            return;
        }
        let mut term: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut term) == 0 {
            term.c_lflag |= libc::ECHO;
            libc::tcsetattr(fd, libc::TCSANOW, &term);
        }
    }
}

/// Prompter fed from a fixed list of answers
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub prompts: Vec<String>,
    pub notices: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            notices: Vec::new(),
        }
    }

    fn next(&mut self, prompt: &str) -> Result<String> {
        self.prompts.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| ProvisionError::Interrupted("operator input closed".to_string()))
    }
}

impl Prompter for ScriptedPrompter {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        self.next(prompt)
    }

    fn read_secret(&mut self, prompt: &str) -> Result<String> {
        self.next(prompt)
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}

/// Asks for every provisioning parameter in order
pub struct ParameterCollector<'a> {
    prompter: &'a mut dyn Prompter,
}

impl<'a> ParameterCollector<'a> {
    pub fn new(prompter: &'a mut dyn Prompter) -> Self {
        Self { prompter }
    }

    /// Collect and confirm the full parameter set
    pub fn collect(&mut self) -> Result<ProvisioningParameters> {
        loop {
            let params = self.collect_once()?;

            self.prompter.notify(&summary(&params));
            let answer = self
                .prompter
                .read_line("Are these values correct? [yes/no]")?;
            if answer.trim().eq_ignore_ascii_case("yes") || answer.trim().eq_ignore_ascii_case("y")
            {
                info!("Provisioning parameters accepted");
                return Ok(params);
            }
            self.prompter.notify("Starting parameter entry again.");
        }
    }

    fn collect_once(&mut self) -> Result<ProvisioningParameters> {
        let time_server = self.ask("Time server (NTP) address:", |v| {
            ValidationUtils::validate_server_address(v)
        })?;
        let host_identity = self.ask("Proxy host identity:", |v| {
            ValidationUtils::validate_hostname(v)
        })?;
        let server_address = self.ask("Upstream monitoring server address:", |v| {
            ValidationUtils::validate_server_address(v)
        })?;
        let psk = self.ask_confirmed(
            &format!("Pre-shared key ({} characters):", PSK_LENGTH),
            "Confirm pre-shared key:",
            ValidationUtils::validate_psk,
        )?;
        let psk_identity = self.ask("PSK identity (empty to use the host identity):", |v| {
            if v.is_empty() {
                Ok(())
            } else {
                ValidationUtils::validate_hostname(v)
            }
        })?;
        let db_user = self.ask("Database application user:", |v| {
            ValidationUtils::validate_db_user(v)
        })?;
        let db_password = self.ask_confirmed(
            "Database application password:",
            "Confirm database password:",
            ValidationUtils::validate_db_password,
        )?;

        Ok(ProvisioningParameters {
            time_server,
            host_identity,
            server_address,
            psk,
            psk_identity,
            database: DatabaseCredentials {
                user: db_user,
                password: db_password,
            },
        })
    }

    /// Ask until `validate` accepts the trimmed answer
    fn ask<F>(&mut self, prompt: &str, validate: F) -> Result<String>
    where
        F: Fn(&str) -> Result<()>,
    {
        loop {
            let answer = self.prompter.read_line(prompt)?;
            let answer = answer.trim().to_string();
            match validate(&answer) {
                Ok(()) => return Ok(answer),
                Err(e) => self.reject(e)?,
            }
        }
    }

    /// Ask for a secret twice until both entries pass `validate`
    fn ask_confirmed<F>(&mut self, prompt: &str, confirm_prompt: &str, validate: F) -> Result<String>
    where
        F: Fn(&str, &str) -> Result<()>,
    {
        loop {
            let secret = self.prompter.read_secret(prompt)?;
            let confirmation = self.prompter.read_secret(confirm_prompt)?;
            match validate(&secret, &confirmation) {
                Ok(()) => return Ok(secret),
                Err(e) => self.reject(e)?,
            }
        }
    }

    fn reject(&mut self, err: ProvisionError) -> Result<()> {
        if err.severity() != Severity::ValidationRetry {
            return Err(err);
        }
        self.prompter.notify(&format!("Invalid input: {}", err));
        Ok(())
    }
}

/// Operator-facing echo of the collected values, secrets masked
pub fn summary(params: &ProvisioningParameters) -> String {
    format!(
        "Time server:     {}\nHost identity:   {}\nServer address:  {}\nPSK identity:    {}\nPre-shared key:  {} characters\nDatabase user:   {}",
        params.time_server,
        params.host_identity,
        params.server_address,
        params.effective_psk_identity(),
        params.psk.chars().count(),
        params.database.user,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PSK: &str = "0123456789abcdef0123456789abcdef";

    fn happy_answers() -> Vec<&'static str> {
        vec![
            "ntp.example.net",
            "proxy-01",
            "10.0.0.5",
            PSK,
            PSK,
            "",
            "agent",
            "db-password-1",
            "db-password-1",
            "yes",
        ]
    }

    #[test]
    fn test_collect_happy_path() {
        let mut prompter = ScriptedPrompter::new(happy_answers());

        let params = ParameterCollector::new(&mut prompter).collect().unwrap();

        assert_eq!(params.time_server, "ntp.example.net");
        assert_eq!(params.host_identity, "proxy-01");
        assert_eq!(params.psk, PSK);
        assert_eq!(params.effective_psk_identity(), "proxy-01");
        assert_eq!(params.database.user, "agent");
        assert!(prompter.notices.iter().all(|n| !n.starts_with("Invalid")));
    }

    #[test]
    fn test_short_psk_is_rejected_then_accepted() {
        let mut answers = happy_answers();
        answers.splice(3..3, ["abc", "abc"]);
        let mut prompter = ScriptedPrompter::new(answers);

        let params = ParameterCollector::new(&mut prompter).collect().unwrap();

        assert_eq!(params.psk, PSK);
        let rejections: Vec<_> = prompter
            .notices
            .iter()
            .filter(|n| n.starts_with("Invalid input"))
            .collect();
        assert_eq!(rejections.len(), 1);
        assert!(rejections[0].contains("exactly 32"));
    }

    #[test]
    fn test_mismatched_confirmation_re_prompts() {
        let mut answers = happy_answers();
        answers.splice(3..3, [PSK, "fedcba9876543210fedcba9876543210"]);
        let mut prompter = ScriptedPrompter::new(answers);

        let params = ParameterCollector::new(&mut prompter).collect().unwrap();

        assert_eq!(params.psk, PSK);
        assert!(prompter.notices.iter().any(|n| n.contains("do not match")));
    }

    #[test]
    fn test_invalid_hostname_loops() {
        let mut answers = happy_answers();
        answers.splice(1..1, ["-bad-", "", "under_score"]);
        let mut prompter = ScriptedPrompter::new(answers);

        let params = ParameterCollector::new(&mut prompter).collect().unwrap();

        assert_eq!(params.host_identity, "proxy-01");
        assert_eq!(
            prompter
                .notices
                .iter()
                .filter(|n| n.starts_with("Invalid input"))
                .count(),
            3
        );
    }

    #[test]
    fn test_answering_no_restarts_collection() {
        let mut answers = happy_answers();
        answers.pop();
        answers.push("no");
        answers.extend(happy_answers());
        let mut prompter = ScriptedPrompter::new(answers);

        let params = ParameterCollector::new(&mut prompter).collect().unwrap();

        assert_eq!(params.host_identity, "proxy-01");
        assert!(prompter.notices.iter().any(|n| n.contains("again")));
    }

    #[test]
    fn test_closed_input_aborts() {
        let mut prompter = ScriptedPrompter::new(vec!["ntp.example.net"]);
        let err = ParameterCollector::new(&mut prompter).collect().unwrap_err();
        assert!(matches!(err, ProvisionError::Interrupted(_)));
    }

    #[test]
    fn test_summary_masks_secrets() {
        let mut prompter = ScriptedPrompter::new(happy_answers());
        let params = ParameterCollector::new(&mut prompter).collect().unwrap();

        let text = summary(&params);
        assert!(!text.contains(PSK));
        assert!(!text.contains("db-password-1"));
        assert!(text.contains("32 characters"));
    }
}
