// file: src/steps/agent_config.rs
// version: 1.0.0
// guid: ac000001-2345-6789-abcd-ef0123456789

//! Key substitution into the agent's line-oriented `Key=value` config.
//!
//! Rewriting is a pure function of the template and the managed values:
//! the first active line for a key is replaced in place, later active
//! duplicates are dropped, commented lines are left alone and keys with no
//! line are appended under a single header.

use crate::config::{ProvisionSettings, ProvisioningParameters};

/// Header placed above appended keys
pub const MANAGED_HEADER: &str = "# Managed by firstboot-provision";

/// Fixed TLS block required for PSK authentication
pub const TLS_BLOCK: &[(&str, &str)] = &[("TLSConnect", "psk"), ("TLSAccept", "psk")];

/// Keys this tool owns in the agent config
pub const MANAGED_KEYS: &[&str] = &[
    "Server",
    "Hostname",
    "TLSPSKFile",
    "TLSPSKIdentity",
    "DBName",
    "DBUser",
    "DBPassword",
];

/// Key of an active (uncommented) `Key=value` line
fn active_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Rewrite `template` so each key in `values` appears exactly once, active
pub fn apply_settings<K, V>(template: &str, values: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut seen = vec![false; values.len()];
    let mut lines: Vec<String> = Vec::new();

    for line in template.lines() {
        let index = active_key(line)
            .and_then(|key| values.iter().position(|(k, _)| k.as_ref() == key));

        match index {
            Some(i) if seen[i] => continue,
            Some(i) => {
                seen[i] = true;
                let (key, value) = &values[i];
                lines.push(format!("{}={}", key.as_ref(), value.as_ref()));
            }
            None => lines.push(line.to_string()),
        }
    }

    let missing: Vec<usize> = (0..values.len()).filter(|&i| !seen[i]).collect();
    if !missing.is_empty() {
        if !lines.iter().any(|l| l.trim() == MANAGED_HEADER) {
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(MANAGED_HEADER.to_string());
        }
        for i in missing {
            let (key, value) = &values[i];
            lines.push(format!("{}={}", key.as_ref(), value.as_ref()));
        }
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Managed values for this appliance, in the order they are appended
pub fn managed_values(
    params: &ProvisioningParameters,
    settings: &ProvisionSettings,
) -> Vec<(String, String)> {
    let mut values: Vec<(String, String)> = vec![
        ("Server".into(), params.server_address.clone()),
        ("Hostname".into(), params.host_identity.clone()),
        (
            "TLSPSKFile".into(),
            settings.paths.psk_file.display().to_string(),
        ),
        (
            "TLSPSKIdentity".into(),
            params.effective_psk_identity().to_string(),
        ),
        ("DBName".into(), settings.database.name.clone()),
        ("DBUser".into(), params.database.user.clone()),
        ("DBPassword".into(), params.database.password.clone()),
    ];
    values.extend(
        TLS_BLOCK
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    );
    values
}

/// Render the agent config for `params` on top of `template`
pub fn render_agent_config(
    template: &str,
    params: &ProvisioningParameters,
    settings: &ProvisionSettings,
) -> String {
    apply_settings(template, &managed_values(params, settings))
}
