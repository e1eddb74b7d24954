// file: src/config/loader.rs
// version: 2.0.0
// guid: d4e5f6g7-h8i9-0123-4567-890123defghi

//! Configuration file loading and environment variable substitution

use super::{ProvisionSettings, ProvisioningParameters};
use crate::error::ProvisionError;
use crate::Result;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
    env_vars: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Create a loader that only sees the given variables
    pub fn with_env(env_vars: HashMap<String, String>) -> Self {
        Self { env_vars }
    }

    /// Load provisioning settings from a YAML or TOML file
    pub fn load_settings<P: AsRef<Path>>(&self, path: P) -> Result<ProvisionSettings> {
        let settings: ProvisionSettings = self.load_document(path.as_ref(), "settings")?;
        settings.validate_settings()?;
        Ok(settings)
    }

    /// Load settings from a file, or fall back to the built-in defaults
    pub fn load_settings_or_default(&self, path: Option<&Path>) -> Result<ProvisionSettings> {
        match path {
            Some(path) => self.load_settings(path),
            None => {
                let settings = ProvisionSettings::default();
                settings.validate_settings()?;
                Ok(settings)
            }
        }
    }

    /// Load pre-recorded provisioning parameters (used by `render-config`)
    pub fn load_parameters<P: AsRef<Path>>(&self, path: P) -> Result<ProvisioningParameters> {
        let params: ProvisioningParameters = self.load_document(path.as_ref(), "parameters")?;
        params.validate()?;
        Ok(params)
    }

    fn load_document<T: DeserializeOwned>(&self, path: &Path, what: &str) -> Result<T> {
        let content = fs::read_to_string(path).map_err(|e| {
            ProvisionError::config(format!(
                "Failed to read {} file {}: {}",
                what,
                path.display(),
                e
            ))
        })?;

        let expanded = self.expand_env_vars(&content)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&expanded)?),
            _ => Ok(serde_yaml::from_str(&expanded)?),
        }
    }

    /// Expand `${VAR}` placeholders in configuration content
    fn expand_env_vars(&self, content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ProvisionError::config(format!("Invalid regex pattern: {}", e)))?;

        let mut missing_vars = Vec::new();
        let result = re.replace_all(content, |cap: &regex::Captures<'_>| {
            let var_name = &cap[1];
            match self.env_vars.get(var_name) {
                Some(value) => value.clone(),
                None => {
                    if !missing_vars.iter().any(|v: &String| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    cap[0].to_string()
                }
            }
        });

        if !missing_vars.is_empty() {
            return Err(ProvisionError::config(format!(
                "Missing environment variables: {}",
                missing_vars.join(", ")
            )));
        }

        Ok(result.into_owned())
    }

    /// Set environment variable for substitution
    pub fn set_env_var(&mut self, key: String, value: String) {
        self.env_vars.insert(key, value);
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expand_env_vars() {
        let mut loader = ConfigLoader::with_env(HashMap::new());
        loader.set_env_var("DATA".to_string(), "/srv/data".to_string());

        let out = loader
            .expand_env_vars("paths:\n  data_dir: ${DATA}/log\n")
            .unwrap();
        assert_eq!(out, "paths:\n  data_dir: /srv/data/log\n");
    }

    #[test]
    fn test_expand_env_vars_reports_all_missing() {
        let loader = ConfigLoader::with_env(HashMap::new());
        let err = loader.expand_env_vars("${ONE} ${TWO} ${ONE}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ONE, TWO"), "{msg}");
    }

    #[test]
    fn test_load_yaml_settings_with_partial_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(
            &path,
            "disk:\n  min_data_gb: 120\nhardening:\n  log_account: auditor\nself_remove: false\n",
        )
        .unwrap();

        let settings = ConfigLoader::with_env(HashMap::new())
            .load_settings(&path)
            .unwrap();

        assert_eq!(settings.disk.min_data_gb, 120);
        assert_eq!(settings.disk.reserved_system_gb, 4);
        assert_eq!(settings.hardening.log_account, "auditor");
        assert!(!settings.self_remove);
    }

    #[test]
    fn test_load_toml_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[disk]\nreserved_system_gb = 10\n").unwrap();

        let settings = ConfigLoader::with_env(HashMap::new())
            .load_settings(&path)
            .unwrap();
        assert_eq!(settings.disk.reserved_system_gb, 10);
    }

    #[test]
    fn test_load_settings_missing_file() {
        let loader = ConfigLoader::with_env(HashMap::new());
        assert!(loader.load_settings("/nonexistent/settings.yaml").is_err());
    }

    #[test]
    fn test_load_parameters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.yaml");
        fs::write(
            &path,
            r#"time_server: ntp.example.net
host_identity: proxy-01
server_address: 10.0.0.5
psk: ${PSK}
database:
  user: agent
  password: db-password-1
"#,
        )
        .unwrap();

        let mut env = HashMap::new();
        env.insert(
            "PSK".to_string(),
            "abcdefabcdefabcdefabcdefabcdefab".to_string(),
        );
        let params = ConfigLoader::with_env(env).load_parameters(&path).unwrap();
        assert_eq!(params.host_identity, "proxy-01");
        assert_eq!(params.effective_psk_identity(), "proxy-01");
    }
}
