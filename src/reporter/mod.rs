// file: src/reporter/mod.rs
// version: 2.0.0
// guid: j0k1l2m3-n4o5-6789-0123-def456789012

//! Operator-facing final report.
//!
//! This is the only place the generated account password is shown. It goes
//! to stdout and never through `tracing`.

use crate::system::utils::NicIdentity;
use colored::Colorize;
use std::fmt;
use uuid::Uuid;

/// Summary printed at the end of a successful run
#[derive(Clone)]
pub struct FinalReport {
    pub run_id: Uuid,
    pub host_identity: String,
    pub account: String,
    pub password: String,
    pub interfaces: Vec<NicIdentity>,
    pub ticket_instruction: String,
}

impl fmt::Debug for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalReport")
            .field("run_id", &self.run_id)
            .field("host_identity", &self.host_identity)
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

impl FinalReport {
    /// Plain-text report body
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Provisioning complete\n");
        out.push_str(&format!("Run id:          {}\n", self.run_id));
        out.push_str(&format!("Host identity:   {}\n", self.host_identity));
        out.push('\n');
        out.push_str(&format!("Log access account: {}\n", self.account));
        out.push_str(&format!("Password (shown once, record it now): {}\n", self.password));
        out.push('\n');
        out.push_str("Network interfaces:\n");
        if self.interfaces.is_empty() {
            out.push_str("  (no hardware addresses found)\n");
        }
        for nic in &self.interfaces {
            out.push_str(&format!("  {:<16} {}\n", nic.name, nic.mac));
        }
        out.push('\n');
        out.push_str(&self.ticket_instruction);
        out.push('\n');
        out
    }

    /// Print the report to the console with highlighting
    pub fn print(&self) {
        let rule = "=".repeat(60);
        println!("\n{}", rule.bright_blue());
        for line in self.render().lines() {
            if line == "Provisioning complete" {
                println!("{}", line.bold().green());
            } else if line.starts_with("Password") {
                println!("{}", line.bold().yellow());
            } else if line.starts_with("  ") {
                println!("{}", line.cyan());
            } else {
                println!("{}", line);
            }
        }
        println!("{}\n", rule.bright_blue());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> FinalReport {
        FinalReport {
            run_id: Uuid::nil(),
            host_identity: "proxy-01".to_string(),
            account: "logreader".to_string(),
            password: "Secret123456".to_string(),
            interfaces: vec![NicIdentity {
                name: "eno1".to_string(),
                mac: "aa:bb:cc:00:11:22".to_string(),
            }],
            ticket_instruction: "Open a network ticket.".to_string(),
        }
    }

    #[test]
    fn test_render_contains_operator_facts() {
        let text = report().render();

        assert!(text.contains("Secret123456"));
        assert!(text.contains("eno1"));
        assert!(text.contains("aa:bb:cc:00:11:22"));
        assert!(text.ends_with("Open a network ticket.\n"));
    }

    #[test]
    fn test_render_without_interfaces() {
        let mut r = report();
        r.interfaces.clear();
        assert!(r.render().contains("no hardware addresses found"));
    }

    #[test]
    fn test_debug_hides_password() {
        assert!(!format!("{:?}", report()).contains("Secret123456"));
    }
}
